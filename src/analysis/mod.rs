//! Text reports over prepared snapshots.
//!
//! Each report prints a human readable listing followed by a tab separated
//! "Tabulate Statistics" block that scripts can pick up.

use anyhow::{anyhow, Result};

use crate::constants::STRING_PREVIEW_CHARS;
use crate::graph::{Diffable, InstanceId, RefLabel, Size};
use crate::{Diff, SiteId, Snapshot};

fn print_tabulate(header: &[&str], values: &[String]) {
    println!("============================ Tabulate Statistics ============================");
    println!("{}", header.join("\t"));
    println!("{}", values.join("\t"));
    println!("-------------------------- End Tabulate Statistics --------------------------");
}

/// Number of strongly reachable, weakly reachable and unreachable instances,
/// not counting the super root or placeholders
fn reachability_counts(snapshot: &Snapshot) -> (usize, usize, usize) {
    let mut counts = (0, 0, 0);
    for inst in snapshot.instances() {
        if inst.is_super_root() || inst.is_placeholder() {
            continue;
        }
        if inst.is_strongly_reachable() {
            counts.0 += 1;
        } else if inst.is_weakly_reachable() {
            counts.1 += 1;
        } else {
            counts.2 += 1;
        }
    }
    counts
}

/// The `n` rooted instances retaining the most
fn top_rooted(snapshot: &Snapshot, n: usize) -> Vec<(InstanceId, Size)> {
    let mut rooted: Vec<(InstanceId, Size)> = snapshot
        .rooted()
        .iter()
        .map(|id| (*id, snapshot.total_retained_size(*id)))
        .collect();
    rooted.sort_by(|a, b| b.1.cmp(&a.1));
    rooted.truncate(n);
    rooted
}

fn describe(snapshot: &Snapshot, id: InstanceId) -> String {
    let display = snapshot.display(id);
    match snapshot.as_string(id, STRING_PREVIEW_CHARS) {
        Some(s) => format!("{} \"{}\"", display, s.escape_debug()),
        None => display,
    }
}

pub fn summary(snapshot: &Snapshot, top: usize) {
    println!("Heaps:");
    for heap in snapshot.heaps() {
        println!("  {:<16} {}", heap.name(), heap.size());
    }
    let total = snapshot.total_retained_size(snapshot.super_root());
    println!("  {:<16} {}", "total", total);

    let (strong, weak, unreachable) = reachability_counts(snapshot);
    println!(
        "Instances: {} strongly reachable, {} weakly reachable, {} unreachable",
        strong, weak, unreachable
    );

    println!("Top {} rooted instances by retained size:", top);
    for (id, size) in top_rooted(snapshot, top) {
        println!("  {:>12}  {}", size.to_string(), describe(snapshot, id));
    }

    print_tabulate(
        &[
            "heaps",
            "strong",
            "weak",
            "unreachable",
            "rooted",
            "java_bytes",
            "native_bytes",
        ],
        &[
            snapshot.heaps().len().to_string(),
            strong.to_string(),
            weak.to_string(),
            unreachable.to_string(),
            snapshot.rooted().len().to_string(),
            total.java_size().to_string(),
            total.registered_native_size().to_string(),
        ],
    );
}

pub fn path(snapshot: &Snapshot, id: u64) -> Result<()> {
    let inst = snapshot
        .find_instance(id)
        .ok_or_else(|| anyhow!("No instance with id 0x{:x}", id))?;
    let path = match snapshot.path_from_gc_root(inst) {
        Some(path) => path,
        None => {
            println!("{} is not reachable from any GC root", snapshot.display(inst));
            return Ok(());
        }
    };
    for (i, element) in path.iter().enumerate() {
        let marker = if element.is_dominator { "*" } else { " " };
        let field = match &element.field {
            RefLabel::Empty => String::new(),
            label => format!(" {}", label),
        };
        println!(
            "{}{:>4} {}{}",
            marker,
            i,
            describe(snapshot, element.instance),
            field
        );
    }
    print_tabulate(
        &["depth", "retained_bytes"],
        &[
            path.len().to_string(),
            snapshot.total_retained_size(inst).total().to_string(),
        ],
    );
    Ok(())
}

/// Rooted instances of `a` ordered by how much their retained size grew
/// since their baseline in `b`
fn retained_growth(a: &Snapshot, b: &Snapshot, n: usize) -> Vec<(InstanceId, i64)> {
    let mut growth: Vec<(InstanceId, i64)> = a
        .rooted()
        .iter()
        .map(|id| {
            let baseline = a.instance(*id).baseline();
            let delta = a
                .total_retained_size(*id)
                .delta(&b.total_retained_size(baseline));
            (*id, delta)
        })
        .collect();
    growth.sort_by(|x, y| y.1.cmp(&x.1));
    growth.truncate(n);
    growth
}

/// Diff `a` against the baseline snapshot `b`
pub fn diff(a: &mut Snapshot, b: &mut Snapshot, top: usize) {
    Diff::snapshots(a, b);

    println!("Heaps:");
    let mut total_delta = 0;
    for heap in a.heaps() {
        let baseline = b.heap(heap.baseline());
        let delta = heap.size().delta(&baseline.size());
        total_delta += delta;
        let note = if heap.is_placeholder() {
            " (only in baseline)"
        } else if baseline.is_placeholder() {
            " (new)"
        } else {
            ""
        };
        println!("  {:<16} {:+}{}", heap.name(), delta, note);
    }

    println!("Top {} rooted instances by retained size growth:", top);
    for (id, delta) in retained_growth(a, b, top) {
        let baseline = a.instance(id).baseline();
        let note = if b.instance(baseline).is_placeholder() {
            " (new)"
        } else {
            ""
        };
        println!("  {:>+12}  {}{}", delta, describe(a, id), note);
    }

    print_tabulate(
        &["bytes_delta", "placeholders.a", "placeholders.b"],
        &[
            total_delta.to_string(),
            a.num_placeholders().to_string(),
            b.num_placeholders().to_string(),
        ],
    );
}

/// Sites down to `depth` levels below the root, in pre-order, with their
/// depth
fn sites_to_depth(snapshot: &Snapshot, depth: usize) -> Vec<(SiteId, usize)> {
    let mut result = vec![];
    let mut stack = vec![(snapshot.root_site(), 0)];
    while let Some((site, d)) = stack.pop() {
        result.push((site, d));
        if d < depth {
            stack.extend(
                snapshot
                    .site(site)
                    .children()
                    .iter()
                    .rev()
                    .map(|c| (*c, d + 1)),
            );
        }
    }
    result
}

pub fn sites(snapshot: &Snapshot, depth: usize) {
    let shown = sites_to_depth(snapshot, depth);
    for (id, d) in &shown {
        let site = snapshot.site(*id);
        let instances: u64 = site.objects_infos().iter().map(|i| i.num_instances).sum();
        println!(
            "{:indent$}#{} {} {}:{}  {} in {} instances",
            "",
            site.id(),
            site.method_name(),
            site.filename(),
            site.line_number(),
            site.total_size(),
            instances,
            indent = d * 2
        );
    }
    print_tabulate(
        &["sites", "shown"],
        &[snapshot.sites().len().to_string(), shown.len().to_string()],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ArrayValues, Type, Value};
    use crate::snapshot::test_util::*;
    use crate::Frame;

    fn holder_dump(len: usize) -> Snapshot {
        let mut dump = TestDump::new();
        let holder = dump.class("Holder", None, &[("data", Type::Object)]);
        let bytes = dump.class_sized("byte[]", None, &[], 0);
        let small = dump.object(holder, vec![Value::Object(None)]);
        let data = dump.array(bytes, ArrayValues::Bytes(vec![0; len]));
        let big = dump.object(holder, vec![obj(data)]);
        dump.root(small);
        dump.root(big);
        dump.build()
    }

    #[test]
    fn test_reachability_counts() {
        let mut dump = TestDump::new();
        let node = dump.class("Node", None, &[]);
        let x = dump.object(node, vec![]);
        dump.object(node, vec![]);
        dump.root(x);
        let snapshot = dump.build();
        // java.lang.Class, Node and the unrooted object are unreachable
        assert_eq!(reachability_counts(&snapshot), (1, 0, 3));
    }

    #[test]
    fn test_top_rooted() {
        let snapshot = holder_dump(100);
        let top = top_rooted(&snapshot, 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].1, Size::new(116, 0));
        assert_eq!(snapshot.class_name(top[0].0), "Holder");
    }

    #[test]
    fn test_retained_growth() {
        let mut a = holder_dump(300);
        let mut b = holder_dump(100);
        Diff::snapshots(&mut a, &mut b);
        let growth = retained_growth(&a, &b, 2);
        assert_eq!(growth[0].1, 200);
        assert_eq!(growth[1].1, 0);
        // The byte arrays differ in length, so each side gets a placeholder
        assert_eq!(a.num_placeholders(), 1);
        assert_eq!(b.num_placeholders(), 1);
    }

    #[test]
    fn test_sites_to_depth() {
        let mut dump = TestDump::new();
        let main = Frame::new("main", "()V", "Main.java", 1);
        let alloc = Frame::new("alloc", "()V", "Main.java", 10);
        let inner = Frame::new("inner", "()V", "Main.java", 20);
        dump.builder.site(&[alloc.clone(), main.clone()]);
        dump.builder.site(&[inner, alloc, main]);
        let snapshot = dump.build();

        let depths: Vec<usize> = sites_to_depth(&snapshot, 2).iter().map(|(_, d)| *d).collect();
        assert_eq!(depths, vec![0, 1, 2]);
        assert_eq!(sites_to_depth(&snapshot, 5).len(), 4);
        assert_eq!(sites_to_depth(&snapshot, 0).len(), 1);
    }
}
