//! File writers for drained data items.

use crate::error::WriteError;
use harvester_common::data::DataItem;
use serde_json::Value;
use std::{fs::File, io::BufWriter, path::Path};

/// Write `items` to `path`, dispatching on the extension: `csv` for
/// tabular output, `json` for a pretty-printed array. Field error maps
/// are not exported.
pub fn write<'a, I>(path: &Path, items: I) -> Result<(), WriteError>
where
    I: IntoIterator<Item = &'a DataItem>,
{
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();

    match extension {
        "csv" => write_csv(path, items),
        "json" => write_json(path, items),
        other => Err(WriteError::Extension(other.to_string())),
    }?;

    log::info!("Data written to {}", path.display());
    Ok(())
}

/// Header comes from the first item; later items contribute the fields of
/// that header, missing ones as empty cells.
fn write_csv<'a, I>(path: &Path, items: I) -> Result<(), WriteError>
where
    I: IntoIterator<Item = &'a DataItem>,
{
    let mut items = items.into_iter();
    let mut writer = csv::Writer::from_path(path)?;

    let Some(first) = items.next() else {
        writer.flush()?;
        return Ok(());
    };

    let header: Vec<&str> = first.values().keys().map(String::as_str).collect();
    writer.write_record(&header)?;

    for item in std::iter::once(first).chain(items) {
        let row: Vec<String> = header
            .iter()
            .map(|field| item.get(field).map(cell).unwrap_or_default())
            .collect();
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

fn write_json<'a, I>(path: &Path, items: I) -> Result<(), WriteError>
where
    I: IntoIterator<Item = &'a DataItem>,
{
    let values: Vec<_> = items.into_iter().map(DataItem::values).collect();
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, &values)?;
    Ok(())
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<DataItem> {
        vec![
            DataItem::new().field("title", "Dune").field("price", 42),
            DataItem::new().field("title", "Solaris").field("price", 17),
        ]
    }

    #[test]
    fn csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let items = items();
        write(&path, &items).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["price,title", "42,Dune", "17,Solaris"]);
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");

        let items = items();
        write(&path, &items).unwrap();

        let value: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                {"title": "Dune", "price": 42},
                {"title": "Solaris", "price": 17},
            ])
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write(&dir.path().join("out.parquet"), &items()).unwrap_err();
        assert!(matches!(err, WriteError::Extension(ext) if ext == "parquet"));
    }

    #[test]
    fn field_errors_are_not_exported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");

        let items = vec![DataItem::new().try_field("n", || "x".parse::<i64>())];
        write(&path, &items).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("errors"));
    }
}
