//! Record files written and read back

use std::time::Duration;

use hardpoint_bench::record_writer::write_records;
use hardpoint_bench::sampling::{FieldValue, RecordSink};
use hardpoint_bench::{RecordTable, RecordWriter, SampleRecord, SamplingError};

fn columns() -> Vec<String> {
    ["Index", "Seconds", "PLC Time", "206Ch1 [pM]", "Atto Avg. [uM]", "MAIN.tglSine"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn record(index: u64) -> SampleRecord {
    let elapsed = Duration::from_millis(125 * index);
    SampleRecord::new(index, elapsed)
        .with("Index", index as i64)
        .with("Seconds", elapsed.as_secs_f64())
        .with("PLC Time", format!("08:20:{index:02}.500").as_str())
        .with("206Ch1 [pM]", -1_250_000 * index as i64)
        .with("Atto Avg. [uM]", 0.1 * index as f64)
        .with("MAIN.tglSine", index % 2 == 0)
}

#[test]
fn written_records_read_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("HP1-20231206_08h20m.csv");
    let records: Vec<SampleRecord> = (1..=20).map(record).collect();

    let written = write_records(&path, columns(), &[], &records).unwrap();
    let table = RecordTable::read(&path).unwrap();

    assert_eq!(written, 20);
    assert_eq!(table.columns(), columns().as_slice());
    assert_eq!(table.len(), records.len());
    for (row, record) in table.rows().iter().zip(&records) {
        for (value, name) in row.iter().zip(columns()) {
            assert_eq!(Some(value), record.get(&name), "{name} of record {}", record.index());
        }
    }
}

#[test]
fn numeric_looking_text_survives_as_declared_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("times.csv");
    let records: Vec<SampleRecord> = (1..=3)
        .map(|i| record(i).with("PLC Time", format!("{}", 26_000_000 + i).as_str()))
        .collect();

    write_records(&path, columns(), &[], &records).unwrap();
    let table = RecordTable::read_with_text_columns(&path, &["PLC Time".to_string()]).unwrap();

    for (row, record) in table.rows().iter().zip(&records) {
        assert_eq!(Some(&row[2]), record.get("PLC Time"));
    }
    assert_eq!(table.rows()[0][2], FieldValue::Text("26000001".into()));
}

#[test]
fn preamble_lines_are_skipped_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("HP1-PosRep.csv");
    let preamble = vec![
        "HP1".to_string(),
        "Date: December 06 2023".to_string(),
        "Kp = 12  Ki= 3".to_string(),
    ];

    write_records(&path, columns(), &preamble, &[record(1)]).unwrap();
    let table = RecordTable::read(&path).unwrap();

    assert_eq!(table.len(), 1);
    assert_eq!(table.rows()[0][0], FieldValue::Int(1));
}

#[test]
fn missing_field_stops_writing_but_keeps_earlier_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.csv");
    let mut writer = RecordWriter::create(&path, columns(), &[]).unwrap();

    writer.append(&record(1)).unwrap();
    writer.append(&record(2)).unwrap();
    let incomplete = SampleRecord::new(3, Duration::ZERO).with("Index", 3i64);
    let err = writer.append(&incomplete).unwrap_err();

    assert!(matches!(err, SamplingError::SchemaMismatch { ref field, .. } if field == "Seconds"));
    let table = RecordTable::read(&path).unwrap();
    assert_eq!(table.len(), 2);
}
