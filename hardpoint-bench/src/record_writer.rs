//! CSV persistence for sample records
//!
//! Files start with optional `#` comment lines (the run preamble), then a
//! header row with the declared column order, then one row per record.
//! Every row is flushed as it is written so an aborted session leaves all
//! completed rows on disk.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::sampling::{FieldValue, RecordSink, SampleRecord};
use crate::SamplingError;

/// Writes records in a fixed column order.
pub struct RecordWriter<W: Write> {
    writer: csv::Writer<W>,
    columns: Vec<String>,
    rows_written: u64,
}

impl RecordWriter<File> {
    /// Create `path`, write the preamble and header.
    pub fn create(
        path: impl AsRef<Path>,
        columns: Vec<String>,
        preamble: &[String],
    ) -> Result<Self, SamplingError> {
        let file = File::create(path.as_ref())?;
        debug!("Writing records to {}", path.as_ref().display());
        Self::from_writer(file, columns, preamble)
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn from_writer(
        mut inner: W,
        columns: Vec<String>,
        preamble: &[String],
    ) -> Result<Self, SamplingError> {
        for line in preamble.iter().flat_map(|entry| entry.lines()) {
            writeln!(inner, "# {line}")?;
        }

        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(&columns)?;
        writer.flush()?;

        Ok(Self {
            writer,
            columns,
            rows_written: 0,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Append one record as a row and flush it.
    ///
    /// # Errors
    /// [`SamplingError::SchemaMismatch`] if the record lacks a declared
    /// column; nothing is written for that record.
    pub fn write_record(&mut self, record: &SampleRecord) -> Result<(), SamplingError> {
        let row = self
            .columns
            .iter()
            .map(|column| {
                record.get(column).map(FieldValue::to_string).ok_or_else(|| {
                    SamplingError::missing_field(column.as_str(), format!("record {}", record.index()))
                })
            })
            .collect::<Result<Vec<String>, _>>()?;

        self.writer.write_record(&row)?;
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, SamplingError> {
        self.writer
            .into_inner()
            .map_err(|e| SamplingError::Io(e.into_error()))
    }
}

impl<W: Write> RecordSink for RecordWriter<W> {
    fn append(&mut self, record: &SampleRecord) -> Result<(), SamplingError> {
        self.write_record(record)
    }
}

/// Write `records` to a new file in one go.
pub fn write_records(
    path: impl AsRef<Path>,
    columns: Vec<String>,
    preamble: &[String],
    records: &[SampleRecord],
) -> Result<u64, SamplingError> {
    let mut writer = RecordWriter::create(path, columns, preamble)?;
    for record in records {
        writer.write_record(record)?;
    }
    Ok(writer.rows_written())
}

/// Table read back from a record file.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordTable {
    columns: Vec<String>,
    rows: Vec<Vec<FieldValue>>,
}

impl RecordTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<FieldValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, SamplingError> {
        Self::read_with_text_columns(path, &[])
    }

    /// Like [`RecordTable::read`], keeping `text_columns` as text.
    pub fn read_with_text_columns(
        path: impl AsRef<Path>,
        text_columns: &[String],
    ) -> Result<Self, SamplingError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader_with_text_columns(file, text_columns)
    }

    /// Parse a record file, skipping `#` preamble lines.
    ///
    /// Cells are typed by [`FieldValue::parse`], so text that looks like a
    /// number reads back as a number. Use
    /// [`RecordTable::from_reader_with_text_columns`] for such columns.
    pub fn from_reader(reader: impl Read) -> Result<Self, SamplingError> {
        Self::from_reader_with_text_columns(reader, &[])
    }

    /// Parse a record file, reading the named columns verbatim as text.
    pub fn from_reader_with_text_columns(
        reader: impl Read,
        text_columns: &[String],
    ) -> Result<Self, SamplingError> {
        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .has_headers(true)
            .from_reader(reader);

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let is_text: Vec<bool> = columns.iter().map(|c| text_columns.contains(c)).collect();
        let mut rows = Vec::new();
        for row in reader.records() {
            let row = row?;
            rows.push(
                row.iter()
                    .zip(&is_text)
                    .map(|(cell, &text)| {
                        if text {
                            FieldValue::Text(cell.to_string())
                        } else {
                            FieldValue::parse(cell)
                        }
                    })
                    .collect(),
            );
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<FieldValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Check that every name in `expected` is present.
    pub fn require_columns(&self, expected: &[String]) -> Result<(), SamplingError> {
        match expected.iter().find(|name| self.column_index(name).is_none()) {
            Some(missing) => Err(SamplingError::missing_field(missing.as_str(), "not in table header")),
            None => Ok(()),
        }
    }

    /// Values of one column as numbers.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>, SamplingError> {
        let index = self
            .column_index(name)
            .ok_or_else(|| SamplingError::missing_field(name, "not in table header"))?;

        self.rows
            .iter()
            .enumerate()
            .map(|(row, values)| {
                values
                    .get(index)
                    .and_then(FieldValue::as_f64)
                    .ok_or_else(|| SamplingError::missing_field(name, format!("row {} is not numeric", row + 1)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn columns() -> Vec<String> {
        vec!["Index".into(), "Seconds".into(), "PLC Time".into()]
    }

    fn record(index: u64) -> SampleRecord {
        SampleRecord::new(index, Duration::ZERO)
            .with("Index", index as i64)
            .with("Seconds", index as f64 * 0.5)
            .with("PLC Time", "08:20:32")
    }

    #[test]
    fn test_header_and_preamble() {
        let preamble = vec!["HP1".to_string(), "Kp = 12  Ki= 3".to_string()];
        let mut writer = RecordWriter::from_writer(Vec::new(), columns(), &preamble).unwrap();
        writer.write_record(&record(1)).unwrap();

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();

        assert_eq!(
            text,
            "# HP1\n# Kp = 12  Ki= 3\nIndex,Seconds,PLC Time\n1,0.5,08:20:32\n"
        );
    }

    #[test]
    fn test_missing_field_rejected() {
        let mut writer = RecordWriter::from_writer(Vec::new(), columns(), &[]).unwrap();
        let partial = SampleRecord::new(2, Duration::ZERO).with("Index", 2i64);

        let err = writer.write_record(&partial).unwrap_err();

        assert!(matches!(err, SamplingError::SchemaMismatch { ref field, .. } if field == "Seconds"));
        assert_eq!(writer.rows_written(), 0);
    }

    #[test]
    fn test_extra_fields_ignored() {
        let mut writer = RecordWriter::from_writer(Vec::new(), vec!["Index".into()], &[]).unwrap();
        writer.write_record(&record(7)).unwrap();

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "Index\n7\n");
    }

    #[test]
    fn test_reader_skips_preamble() {
        let text = "# HP1\n# Date: December 06 2023\nIndex,Seconds\n1,0.0\n2,0.25\n";

        let table = RecordTable::from_reader(text.as_bytes()).unwrap();

        assert_eq!(table.columns(), &["Index".to_string(), "Seconds".to_string()]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.numeric_column("Seconds").unwrap(), vec![0.0, 0.25]);
    }

    #[test]
    fn test_numeric_looking_text_needs_declared_column() {
        let mut writer = RecordWriter::from_writer(Vec::new(), columns(), &[]).unwrap();
        let record = record(1).with("PLC Time", "26000000");
        writer.write_record(&record).unwrap();
        let bytes = writer.into_inner().unwrap();

        let untyped = RecordTable::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(untyped.rows()[0][2], FieldValue::Int(26_000_000));

        let typed =
            RecordTable::from_reader_with_text_columns(bytes.as_slice(), &["PLC Time".to_string()])
                .unwrap();
        assert_eq!(typed.rows()[0][2], FieldValue::Text("26000000".into()));
        assert_eq!(typed.rows()[0][0], FieldValue::Int(1));
    }

    #[test]
    fn test_require_columns() {
        let table = RecordTable::from_reader("Index,Seconds\n1,0.0\n".as_bytes()).unwrap();

        assert!(table.require_columns(&["Index".to_string()]).is_ok());
        assert!(matches!(
            table.require_columns(&["BWY [mm]".to_string()]),
            Err(SamplingError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_ragged_row_is_error() {
        let err = RecordTable::from_reader("a,b\n1,2\n3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SamplingError::Csv(_)));
    }
}
