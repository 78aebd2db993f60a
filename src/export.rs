use std::fs::File;
use std::path::Path;

use anyhow::Result;
use polars::prelude::*;

use crate::graph::InstanceId;
use crate::Snapshot;

/// Per (heap, class) histogram of the strongly reachable instances, largest
/// retained size first
pub fn class_histogram(snapshot: &Snapshot) -> Result<DataFrame> {
    let mut heaps = vec![];
    let mut classes = vec![];
    let mut java = vec![];
    let mut native = vec![];
    let mut retained = vec![];
    for (i, inst) in snapshot.instances().iter().enumerate() {
        if !inst.is_strongly_reachable() {
            continue;
        }
        let Some(heap) = inst.heap() else {
            continue;
        };
        let id = InstanceId::from_index(i);
        let size = snapshot.size(id);
        heaps.push(snapshot.heap(heap).name().to_string());
        classes.push(snapshot.class_name(id).to_string());
        java.push(size.java_size());
        native.push(size.registered_native_size());
        retained.push(snapshot.total_retained_size(id).total());
    }
    let lf = df!(
        "heap" => heaps,
        "class" => classes,
        "java_bytes" => java,
        "native_bytes" => native,
        "retained_bytes" => retained
    )?
    .lazy();
    let df = lf
        .group_by([col("heap"), col("class")])
        .agg([
            col("java_bytes").count().alias("count"),
            col("java_bytes").sum(),
            col("native_bytes").sum(),
            col("retained_bytes").sum(),
        ])
        .sort(
            "retained_bytes",
            SortOptions {
                descending: true,
                ..Default::default()
            },
        )
        .collect()?;
    Ok(df)
}

pub fn export(snapshot: &Snapshot, output_path: impl AsRef<Path>) -> Result<()> {
    let mut df = class_histogram(snapshot)?;
    df.as_single_chunk_par();
    info!(
        "Writing {} classes to {}",
        df.height(),
        output_path.as_ref().display()
    );
    let file = File::create(output_path)?;
    let writer = ParquetWriter::new(file);
    writer.finish(&mut df)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Type;
    use crate::snapshot::test_util::*;

    fn dump() -> Snapshot {
        let mut dump = TestDump::new();
        let node = dump.class("Node", None, &[("next", Type::Object)]);
        let leaf = dump.class_sized("Leaf", None, &[], 8);
        let l = dump.object(leaf, vec![]);
        let b = dump.object(node, vec![obj(l)]);
        let a = dump.object(node, vec![obj(b)]);
        dump.object(leaf, vec![]);
        dump.root(a);
        dump.build()
    }

    #[test]
    fn test_class_histogram() {
        let df = class_histogram(&dump()).unwrap();
        assert_eq!(df.height(), 2);
        let classes: Vec<Option<&str>> = df.column("class").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(classes, vec![Some("Node"), Some("Leaf")]);
        let retained: Vec<Option<u64>> = df
            .column("retained_bytes")
            .unwrap()
            .u64()
            .unwrap()
            .into_iter()
            .collect();
        // a retains everything, b retains itself and the reachable leaf
        assert_eq!(retained, vec![Some(40 + 24), Some(8)]);
    }

    #[test]
    fn test_export_parquet() {
        let path = std::env::temp_dir().join(format!("heapsnap-export-{}.parquet", std::process::id()));
        export(&dump(), &path).unwrap();
        let df = ParquetReader::new(File::open(&path).unwrap()).finish().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(
            df.get_column_names(),
            vec!["heap", "class", "count", "java_bytes", "native_bytes", "retained_bytes"]
        );
        std::fs::remove_file(path).unwrap();
    }
}
