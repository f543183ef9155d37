//! CSV-backed attendance table.
//!
//! Every append is a read-modify-write of the whole file. A table that
//! cannot be parsed is replaced by a fresh one holding only the new record;
//! I/O failures are returned to the caller untouched.

use crate::ledger::{AttendanceRecord, AttendanceStore, StoreError};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const HEADER: [&str; 3] = ["Name", "Date", "Time"];

/// Positions of `Name`, `Date` and `Time` within a table's header.
struct Columns {
    name: usize,
    date: usize,
    time: usize,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Option<Self> {
        let find = |wanted: &str| headers.iter().position(|h| h == wanted);
        Some(Self {
            name: find(HEADER[0])?,
            date: find(HEADER[1])?,
            time: find(HEADER[2])?,
        })
    }

    fn extract(&self, row: &csv::StringRecord) -> AttendanceRecord {
        let field = |index: usize| row.get(index).unwrap_or_default().to_string();
        AttendanceRecord {
            name: field(self.name),
            date: field(self.date),
            time: field(self.time),
        }
    }
}

pub struct CsvAttendanceStore {
    path: PathBuf,
}

impl CsvAttendanceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the parent directory and a header-only table if the file is missing.
    pub fn ensure_initialized(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            return Ok(());
        }
        tracing::info!(path = %self.path.display(), "creating attendance table");
        self.write_table(&[])
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn classify(&self, err: csv::Error) -> StoreError {
        let reason = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(source) => self.io_error(source),
            _ => StoreError::Corrupt {
                path: self.path.clone(),
                reason,
            },
        }
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }

    /// Read every row, locating the three columns by header name.
    ///
    /// Extra columns are ignored and short rows are padded with empty fields.
    /// Only a missing column, a row wider than the header, or bytes the CSV
    /// reader rejects make the table corrupt.
    fn read_table(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader.headers().map_err(|e| self.classify(e))?.clone();
        if headers.is_empty() {
            // Zero-byte file: no header, no data.
            return Ok(Vec::new());
        }
        let columns = Columns::locate(&headers)
            .ok_or_else(|| self.corrupt(format!("header {:?} lacks one of {HEADER:?}", headers.iter().collect::<Vec<_>>())))?;

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| self.classify(e))?;
            if row.len() > headers.len() {
                let line = row.position().map_or(0, |p| p.line());
                return Err(self.corrupt(format!(
                    "line {line} has {} fields, header has {}",
                    row.len(),
                    headers.len()
                )));
            }
            records.push(columns.extract(&row));
        }
        Ok(records)
    }

    /// Replace the table atomically: write a sibling temp file, then rename it over the target.
    fn write_table(&self, records: &[AttendanceRecord]) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;

        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file());
            writer.write_record(HEADER).map_err(|e| self.classify(e))?;
            for record in records {
                writer.serialize(record).map_err(|e| self.classify(e))?;
            }
            writer.flush().map_err(|e| self.io_error(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        Ok(())
    }
}

impl AttendanceStore for CsvAttendanceStore {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let mut records = match self.read_table() {
            Ok(records) => records,
            Err(StoreError::Corrupt { path, reason }) => {
                tracing::warn!(
                    path = %path.display(),
                    %reason,
                    "attendance table is corrupt; discarding it and starting a new one"
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        records.push(record.clone());
        self.write_table(&records)
    }

    fn records(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.read_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AttendanceLedger, MarkOutcome, Session};
    use crate::types::Identity;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::io::Write;
    use tempfile::tempdir;

    fn plant(path: &Path, bytes: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let tmp = tempdir().unwrap();
        let store = CsvAttendanceStore::new(tmp.path().join("attendance.csv"));
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_ensure_initialized_writes_header_only() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance").join("attendance.csv");
        let store = CsvAttendanceStore::new(&path);

        store.ensure_initialized().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "Name,Date,Time\n");
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_ensure_initialized_keeps_existing_rows() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        let mut store = CsvAttendanceStore::new(&path);
        store.append(&AttendanceRecord::new("alice", at(9, 0, 0))).unwrap();

        store.ensure_initialized().unwrap();
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn test_append_then_read_back_in_order() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        let mut store = CsvAttendanceStore::new(&path);

        let written: Vec<AttendanceRecord> = ["alice", "bob", "carol", "dave", "erin"]
            .iter()
            .enumerate()
            .map(|(i, name)| AttendanceRecord::new(name, at(9, i as u32, 30)))
            .collect();
        for record in &written {
            store.append(record).unwrap();
        }

        let read = store.records().unwrap();
        assert_eq!(read, written);
        assert_eq!(read[3].name, "dave");
        assert_eq!(read[3].date, "2024-03-07");
        assert_eq!(read[3].time, "09:03:30");

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("Name,Date,Time\nalice,2024-03-07,09:00:30\n"));
    }

    #[test]
    fn test_names_with_commas_survive() {
        let tmp = tempdir().unwrap();
        let mut store = CsvAttendanceStore::new(tmp.path().join("attendance.csv"));
        let record = AttendanceRecord::new("Doe, Jane", at(8, 0, 0));

        store.append(&record).unwrap();
        assert_eq!(store.records().unwrap(), vec![record]);
    }

    #[test]
    fn test_zero_byte_file_reads_empty() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        plant(&path, b"");

        let store = CsvAttendanceStore::new(&path);
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_rows_wider_than_header_are_corrupt() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        plant(&path, b"Name,Date,Time\nalice,2024-03-07,08:59:00\nbob,2024-03-07,09:00:00,extra\n");

        let err = CsvAttendanceStore::new(&path).records().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_wrong_header_is_corrupt() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        plant(&path, b"Student,When\nalice,monday\n");

        let err = CsvAttendanceStore::new(&path).records().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_missing_column_is_corrupt() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        plant(&path, b"Name,Date\nalice,2024-03-07\n");

        let err = CsvAttendanceStore::new(&path).records().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_extra_and_reordered_columns_are_kept() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        plant(&path, b"Time,Name,Date,Notes\n09:00:00,bob,2024-01-01,late\n");

        let store = CsvAttendanceStore::new(&path);
        assert_eq!(
            store.records().unwrap(),
            vec![AttendanceRecord {
                name: "bob".into(),
                date: "2024-01-01".into(),
                time: "09:00:00".into(),
            }]
        );
    }

    #[test]
    fn test_short_rows_are_padded() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        plant(&path, b"Name,Date,Time\ndave,2024-01-01\n");

        let records = CsvAttendanceStore::new(&path).records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "dave");
        assert_eq!(records[0].time, "");
    }

    #[test]
    fn test_mark_keeps_rows_of_a_wider_table() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        plant(&path, b"Name,Date,Time,Notes\nbob,2024-01-01,09:00:00,late\n");

        let mut ledger = AttendanceLedger::new(CsvAttendanceStore::new(&path));
        let outcome = ledger
            .try_mark(&mut Session::new(), &Identity::Known("alice".into()), at(9, 0, 0))
            .unwrap();

        assert!(matches!(outcome, MarkOutcome::Marked(_)));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Name,Date,Time\nbob,2024-01-01,09:00:00\nalice,2024-03-07,09:00:00\n"
        );
    }

    #[test]
    fn test_invalid_utf8_is_corrupt() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        plant(&path, b"Name,Date,Time\n\xff\xfe,2024-03-07,09:00:00\n");

        let err = CsvAttendanceStore::new(&path).records().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_corrupt_table_is_reset_on_mark() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        plant(&path, b"Name,Date,Time\nghost,2024-01-01,08:00:00,x,y\n");

        let mut ledger = AttendanceLedger::new(CsvAttendanceStore::new(&path));
        let mut session = Session::new();
        let outcome = ledger
            .try_mark(&mut session, &Identity::Known("alice".into()), at(9, 15, 0))
            .unwrap();

        assert!(matches!(outcome, MarkOutcome::Marked(_)));
        let records = ledger.store().records().unwrap();
        assert_eq!(records, vec![AttendanceRecord::new("alice", at(9, 15, 0))]);
        assert!(!fs::read_to_string(&path).unwrap().contains("ghost"));
    }

    #[test]
    fn test_io_failure_is_not_reset() {
        let tmp = tempdir().unwrap();
        // A directory where the table should be: reads fail at the medium level.
        let path = tmp.path().join("attendance.csv");
        fs::create_dir(&path).unwrap();

        let mut store = CsvAttendanceStore::new(&path);
        let err = store.append(&AttendanceRecord::new("alice", at(9, 0, 0))).unwrap_err();

        assert!(matches!(err, StoreError::Io { .. }));
        assert!(path.is_dir());
    }
}
