//! Record rendering for stdout.

use anyhow::{Context, Result};
use clap::ValueEnum;

use dokkan_core::NormalizedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
}

pub fn render(records: &[NormalizedRecord], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let values: Vec<_> = records.iter().map(NormalizedRecord::to_json).collect();
            Ok(serde_json::to_string_pretty(&values)?)
        }
        OutputFormat::Csv => to_csv(records),
    }
}

/// One row per record. Columns are the union of field names in first-seen
/// order; a field a record lacks is an empty cell.
fn to_csv(records: &[NormalizedRecord]) -> Result<String> {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for name in record.field_names() {
            if !columns.contains(&name) {
                columns.push(name);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    if !columns.is_empty() {
        writer.write_record(&columns)?;
    }
    for record in records {
        let row = columns
            .iter()
            .map(|name| record.get(name).map(|v| v.render()).unwrap_or_default());
        writer.write_record(row)?;
    }
    let bytes = writer.into_inner().context("Failed to flush CSV output")?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dokkan_core::FieldValue;

    fn record(fields: &[(&str, FieldValue)]) -> NormalizedRecord {
        let mut record = NormalizedRecord::new();
        for (name, value) in fields {
            record.insert(*name, value.clone());
        }
        record
    }

    #[test]
    fn csv_uses_union_of_columns() {
        let records = vec![
            record(&[
                ("id", FieldValue::Text("1".into())),
                ("name", FieldValue::Text("Goku, Super Saiyan".into())),
            ]),
            record(&[
                ("id", FieldValue::Text("2".into())),
                ("cost", FieldValue::Number(58.0)),
            ]),
        ];

        let out = render(&records, OutputFormat::Csv).unwrap();

        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "id,name,cost");
        assert_eq!(lines[1], "1,\"Goku, Super Saiyan\",");
        assert_eq!(lines[2], "2,,58");
    }

    #[test]
    fn csv_of_nothing_is_empty() {
        assert_eq!(render(&[], OutputFormat::Csv).unwrap(), "");
    }

    #[test]
    fn json_renders_plain_values() {
        let records = vec![record(&[("hp", FieldValue::Number(12000.0))])];

        let out = render(&records, OutputFormat::Json).unwrap();

        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value, serde_json::json!([{"hp": 12000}]));
    }
}
