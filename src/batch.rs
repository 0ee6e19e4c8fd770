use serde_json::Value;

use crate::types::DecodedRecord;

/// Successfully decoded records forwarded together in one source update.
///
/// Rows keep the order the messages arrived in. Columns are the union of all
/// record keys in first-seen order; a row without a column renders an empty cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    records: Vec<DecodedRecord>,
}

impl Batch {
    pub fn from_records(records: Vec<DecodedRecord>) -> Self {
        Self { records }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DecodedRecord] {
        &self.records
    }

    pub fn columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for record in &self.records {
            for key in record.keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key.as_str());
                }
            }
        }
        columns
    }

    /// Render as comma separated text with a header row.
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let columns = self.columns();
        if columns.is_empty() {
            return Ok(String::new());
        }

        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(&columns)?;
        for record in &self.records {
            let row = columns
                .iter()
                .map(|column| record.get(*column).map(cell).unwrap_or_default());
            writer.write_record(row)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| {
            csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Records as a JSON array, used when the batch itself must be logged.
    pub fn to_json(&self) -> String {
        Value::Array(self.records.iter().cloned().map(Value::Object).collect()).to_string()
    }
}

impl From<Vec<DecodedRecord>> for Batch {
    fn from(records: Vec<DecodedRecord>) -> Self {
        Self::from_records(records)
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
