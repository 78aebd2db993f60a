use super::{ArrayValues, FieldValue, Instance, InstanceId, InstanceKind, RefLabel, Reference, Value};
use crate::constants::JAVA_LANG_REF_REFERENCE;

/// Walk `id`'s class and its super classes, innermost first
pub(crate) fn class_chain(instances: &[Instance], id: InstanceId) -> impl Iterator<Item = InstanceId> + '_ {
    let mut next = instances[id.index()].class_obj;
    std::iter::from_fn(move || {
        let cls = next?;
        next = instances[cls.index()]
            .as_class_obj()
            .and_then(|c| c.super_class);
        Some(cls)
    })
}

/// True if the class of `id`, or any of its super classes, is named
/// `class_name`
pub(crate) fn is_instance_of_class(instances: &[Instance], id: InstanceId, class_name: &str) -> bool {
    class_chain(instances, id).any(|cls| {
        instances[cls.index()]
            .as_class_obj()
            .map_or(false, |c| c.name == class_name)
    })
}

/// Instance fields of a class instance with their names, subclass fields
/// first. Empty for every other kind of instance.
pub(crate) fn instance_fields(instances: &[Instance], id: InstanceId) -> Vec<FieldValue> {
    let values = match &instances[id.index()].kind {
        InstanceKind::ClassInstance(inst) => &inst.fields,
        _ => return vec![],
    };
    let mut result = Vec::with_capacity(values.len());
    let mut values = values.iter();
    for cls in class_chain(instances, id) {
        let Some(class) = instances[cls.index()].as_class_obj() else {
            break;
        };
        for field in &class.instance_fields {
            match values.next() {
                Some(value) => result.push(FieldValue {
                    name: field.name.clone(),
                    ty: field.ty,
                    value: *value,
                }),
                None => return result,
            }
        }
    }
    result
}

/// The outgoing references of an instance, in field (or element) order
pub(crate) fn references(instances: &[Instance], id: InstanceId) -> Vec<Reference> {
    match &instances[id.index()].kind {
        InstanceKind::ClassInstance(_) => {
            let weak_referent = is_instance_of_class(instances, id, JAVA_LANG_REF_REFERENCE);
            instance_fields(instances, id)
                .into_iter()
                .filter_map(|field| {
                    let dst = field.value.as_instance()?;
                    let strong = !(weak_referent && &*field.name == "referent");
                    Some(Reference {
                        src: id,
                        label: RefLabel::Field(field.name),
                        dst,
                        strong,
                    })
                })
                .collect()
        }
        InstanceKind::Array(array) => match &array.values {
            ArrayValues::Objects(elems) => elems
                .iter()
                .enumerate()
                .filter_map(|(i, elem)| {
                    elem.map(|dst| Reference {
                        src: id,
                        label: RefLabel::Index(i),
                        dst,
                        strong: true,
                    })
                })
                .collect(),
            _ => vec![],
        },
        InstanceKind::ClassObj(class) => class
            .static_fields
            .iter()
            .filter_map(|field| match field.value {
                Value::Object(Some(dst)) => Some(Reference {
                    src: id,
                    label: RefLabel::Field(field.name.clone()),
                    dst,
                    strong: true,
                }),
                _ => None,
            })
            .collect(),
        InstanceKind::SuperRoot(root) => root
            .roots
            .iter()
            .enumerate()
            .map(|(i, dst)| Reference {
                src: id,
                label: RefLabel::Root(i),
                dst: *dst,
                strong: true,
            })
            .collect(),
        InstanceKind::PlaceHolder(_) => vec![],
    }
}
