//! # Log + Projection Integration Tests
//!
//! End-to-end coverage of the append log: projection replay on reopen,
//! cursor resume from a saved position, log-to-log copies, and frame
//! round-trips through real files.

use std::sync::{Arc, Mutex};

use flatkit::log::{CursorStep, Projection, RecordLog};
use flatkit::records::{FieldDef, Record, Schema};
use flatkit::storage::MemFile;
use flatkit::types::{FieldType, Value};
use hashbrown::HashMap;

fn reset_schema() -> Arc<Schema> {
    Schema::intern(
        Some("Reset"),
        vec![
            FieldDef::new("id", FieldType::Uint32),
            FieldDef::new("balance", FieldType::BigInt64),
        ],
    )
    .unwrap()
}

fn transfer_schema() -> Arc<Schema> {
    Schema::intern(
        Some("Transfer"),
        vec![
            FieldDef::new("source", FieldType::Uint32),
            FieldDef::new("amount", FieldType::BigInt64),
            FieldDef::new("destination", FieldType::Uint32),
        ],
    )
    .unwrap()
}

fn reset(id: u32, balance: i64) -> Record {
    Record::with_values(
        &reset_schema(),
        &[("id", Value::U32(id)), ("balance", Value::I64(balance))],
    )
    .unwrap()
}

fn transfer(source: u32, amount: i64, destination: u32) -> Record {
    Record::with_values(
        &transfer_schema(),
        &[
            ("source", Value::U32(source)),
            ("amount", Value::I64(amount)),
            ("destination", Value::U32(destination)),
        ],
    )
    .unwrap()
}

/// Account balances rebuilt from Reset/Transfer records.
#[derive(Clone, Default)]
struct Balances {
    accounts: Arc<Mutex<HashMap<u32, i64>>>,
}

impl Balances {
    fn of(&self, id: u32) -> i64 {
        self.accounts.lock().unwrap().get(&id).copied().unwrap_or(0)
    }
}

impl Projection for Balances {
    fn handle(&mut self, record: &Record, _start: u64, _end: u64) {
        let mut accounts = self.accounts.lock().unwrap();
        match record.schema().name() {
            "Reset" => {
                let id = record.get_u64("id").unwrap() as u32;
                let balance = record.get_i64("balance").unwrap();
                accounts.insert(id, balance);
            }
            "Transfer" => {
                let source = record.get_u64("source").unwrap() as u32;
                let destination = record.get_u64("destination").unwrap() as u32;
                let amount = record.get_i64("amount").unwrap();
                *accounts.entry(source).or_insert(0) -= amount;
                *accounts.entry(destination).or_insert(0) += amount;
            }
            other => panic!("unexpected schema {}", other),
        }
    }
}

#[test]
fn projection_replays_transfer_history_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bank.log");

    {
        let mut log = RecordLog::open_path(&path, None).unwrap();
        let mut batch = vec![reset(1, 100), reset(2, 100)];
        for _ in 0..50 {
            batch.push(transfer(1, 1, 2));
        }
        log.write_many_sync(&batch).unwrap();
    }

    let balances = Balances::default();
    let _log = RecordLog::open_path(&path, Some(Box::new(balances.clone()))).unwrap();

    assert_eq!(balances.of(1), 50);
    assert_eq!(balances.of(2), 150);
}

#[test]
fn projection_sees_live_writes_in_order() {
    let balances = Balances::default();
    let mut log = RecordLog::in_memory(Some(Box::new(balances.clone()))).unwrap();

    log.write_one_sync(&reset(7, 10)).unwrap();
    log.write_many_sync(&[transfer(7, 4, 8), transfer(8, 1, 7)])
        .unwrap();

    assert_eq!(balances.of(7), 7);
    assert_eq!(balances.of(8), 3);
}

#[test]
fn cursor_resumes_from_a_saved_end_position() {
    let mut log = RecordLog::in_memory(None).unwrap();
    log.write_many_sync(&[reset(1, 1), reset(2, 2), reset(3, 3)])
        .unwrap();

    let mut cursor = log.cursor().unwrap();
    let mut saved_end = 0;
    for entry in cursor.drain() {
        let (_, _, end) = entry.unwrap();
        saved_end = end;
    }
    assert_eq!(saved_end, log.write_position());

    log.write_many_sync(&[reset(4, 4), reset(5, 5), reset(6, 6)])
        .unwrap();

    let mut resumed = log.cursor_at(saved_end).unwrap();
    let ids: Vec<u64> = resumed
        .drain()
        .map(|entry| entry.unwrap().1.get_u64("id").unwrap())
        .collect();
    assert_eq!(ids, vec![4, 5, 6]);
}

#[test]
fn filtered_cursors_skip_frames_without_decoding() {
    let mut log = RecordLog::in_memory(None).unwrap();
    log.write_many_sync(&[reset(1, 1), transfer(1, 1, 2), reset(2, 2)])
        .unwrap();

    let mut resets_only = log
        .cursor()
        .unwrap()
        .filter(|schema, _, _| schema.name() == "Reset");
    let ids: Vec<u64> = resets_only
        .drain()
        .map(|entry| entry.unwrap().1.get_u64("id").unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn copy_to_produces_an_equivalent_log() {
    let mut source = RecordLog::in_memory(None).unwrap();
    source
        .write_many_sync(&[reset(1, 10), transfer(1, 3, 2), reset(9, 9)])
        .unwrap();

    let target_file = MemFile::new();
    let mut target = RecordLog::open(Box::new(target_file.clone()), None).unwrap();
    let copied = source.copy_to(&mut target).unwrap();
    assert_eq!(copied, source.write_position());

    // Replaying the copy yields the same (schema, fields) sequence.
    let reopened = RecordLog::open(Box::new(target_file), None).unwrap();
    let mut cursor = reopened.cursor().unwrap();
    let mut sequence = Vec::new();
    for entry in cursor.drain() {
        let (_, record, _) = entry.unwrap();
        sequence.push((
            record.schema().id(),
            record.as_bytes().to_vec(),
        ));
    }

    let mut original = Vec::new();
    for entry in source.cursor().unwrap().drain() {
        let (_, record, _) = entry.unwrap();
        original.push((record.schema().id(), record.as_bytes().to_vec()));
    }
    assert_eq!(sequence, original);
}

#[test]
fn frames_round_trip_bit_identical_values() {
    let schema = Schema::intern(
        Some("Mixed"),
        vec![
            FieldDef::new("f", FieldType::Float64),
            FieldDef::new("n", FieldType::BigInt64),
            FieldDef::new("tag", FieldType::Utf8),
            FieldDef::new("blob", FieldType::Bytes),
        ],
    )
    .unwrap();
    let original = Record::with_values(
        &schema,
        &[
            ("f", Value::F64(std::f64::consts::PI)),
            ("n", Value::I64(i64::MIN)),
            ("tag", Value::str("exact ✓")),
            ("blob", Value::bytes(vec![0u8, 255, 128, 1])),
        ],
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundtrip.log");
    {
        let mut log = RecordLog::open_path(&path, None).unwrap();
        log.write_one_sync(&original).unwrap();
    }

    let log = RecordLog::open_path(&path, None).unwrap();
    let mut cursor = log.cursor().unwrap();
    let (_, decoded, _) = cursor.next_blocking(None).unwrap().unwrap();

    assert_eq!(decoded.get_f64("f").unwrap().to_bits(), std::f64::consts::PI.to_bits());
    assert_eq!(decoded.get_i64("n").unwrap(), i64::MIN);
    assert_eq!(decoded.get_str("tag").unwrap(), "exact ✓");
    assert_eq!(decoded.get_bytes("blob").unwrap(), &[0, 255, 128, 1]);
    assert_eq!(decoded.as_bytes(), original.as_bytes());
}

#[test]
fn cursor_blocks_until_a_writer_appends() {
    use std::time::Duration;

    let file = MemFile::new();
    let log = RecordLog::open(Box::new(file.clone()), None).unwrap();
    let mut cursor = log.cursor().unwrap();

    // Nothing yet.
    match cursor.next_step().unwrap() {
        CursorStep::Pending(_) => {}
        _ => panic!("expected pending on an empty log"),
    }

    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        let mut log = RecordLog::open(Box::new(file), None).unwrap();
        log.write_one_sync(&reset(42, 4)).unwrap();
    });

    let (_, record, _) = cursor
        .next_blocking(Some(Duration::from_secs(10)))
        .unwrap()
        .expect("writer delivered a record");
    assert_eq!(record.get_u64("id").unwrap(), 42);
    writer.join().unwrap();
}

#[test]
fn aborting_stops_a_parked_cursor() {
    use flatkit::log::AbortSignal;
    use std::time::Duration;

    let log = RecordLog::in_memory(None).unwrap();
    let abort = AbortSignal::new();
    let mut cursor = log.cursor_with(0, abort.clone()).unwrap();

    let handle = std::thread::spawn(move || cursor.next_blocking(Some(Duration::from_secs(30))));

    std::thread::sleep(Duration::from_millis(50));
    abort.abort();
    let outcome = handle.join().unwrap().unwrap();
    assert!(outcome.is_none(), "aborted cursor yields no record");
}

#[test]
fn unknown_schema_ids_error_with_the_offset() {
    // A frame referencing an id never established: header only, no blob.
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0xdeadbeefdeadbeefu64.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    let err = RecordLog::open(Box::new(MemFile::with_content(bytes)), None)
        .unwrap_err()
        .to_string();
    assert!(err.contains("unknown schema id"), "got: {}", err);
    assert!(err.contains("offset 0"), "got: {}", err);
}

#[test]
fn repeated_schema_blobs_are_tolerated() {
    let schema = reset_schema();
    let frame = |record: &Record| {
        let json = schema.canonical_json().as_bytes();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&schema.id().to_le_bytes());
        bytes.extend_from_slice(&(record.as_bytes().len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(json.len() as u32).to_le_bytes());
        bytes.extend_from_slice(json);
        bytes.extend_from_slice(record.as_bytes());
        bytes
    };

    // Two frames, both carrying the schema blob.
    let mut content = frame(&reset(1, 5));
    content.extend_from_slice(&frame(&reset(2, 6)));

    let log = RecordLog::open(Box::new(MemFile::with_content(content)), None).unwrap();
    let ids: Vec<u64> = log
        .cursor()
        .unwrap()
        .drain()
        .map(|entry| entry.unwrap().1.get_u64("id").unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2]);
}
