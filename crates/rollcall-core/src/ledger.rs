//! Deduplicated attendance marking.
//!
//! A [`Session`] remembers who has been marked during one run. The
//! [`AttendanceLedger`] appends at most one [`AttendanceRecord`] per identity
//! per session, whatever the number of frames the identity shows up in.

use crate::types::Identity;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying medium failed. Never recovered locally.
    #[error("attendance store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The persisted table exists but cannot be parsed.
    #[error("attendance table {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// One attendance event, persisted as a `Name,Date,Time` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
}

impl AttendanceRecord {
    pub fn new(name: &str, at: NaiveDateTime) -> Self {
        Self {
            name: name.to_string(),
            date: at.format(DATE_FORMAT).to_string(),
            time: at.format(TIME_FORMAT).to_string(),
        }
    }
}

/// Append-only table of attendance records.
pub trait AttendanceStore {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError>;
    fn records(&self) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// Store that keeps records in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<AttendanceRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttendanceStore for MemoryStore {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn records(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self.records.clone())
    }
}

/// Identities already marked present during the current run.
#[derive(Debug, Default, Clone)]
pub struct Session {
    marked: HashSet<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.marked.contains(name)
    }

    pub fn len(&self) -> usize {
        self.marked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }

    /// Marked identities in sorted order.
    pub fn marked(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.marked.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A new record was appended.
    Marked(AttendanceRecord),
    /// Already marked this session; nothing written.
    AlreadyMarked,
    /// Not a markable identity.
    Rejected,
}

/// Blank names and the unknown sentinel's label never reach the table.
pub fn is_markable(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && name != Identity::UNKNOWN_LABEL
}

/// Marks attendance into a store, at most once per identity per session.
pub struct AttendanceLedger<S> {
    store: S,
}

impl<S: AttendanceStore> AttendanceLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Record `identity` as present at `now` unless already marked in `session`.
    ///
    /// The identity joins the session only once its record is stored, so a
    /// failed append leaves the session unchanged.
    pub fn try_mark(
        &mut self,
        session: &mut Session,
        identity: &Identity,
        now: NaiveDateTime,
    ) -> Result<MarkOutcome, StoreError> {
        let Some(name) = identity.name().filter(|name| is_markable(name)) else {
            return Ok(MarkOutcome::Rejected);
        };

        if session.contains(name) {
            return Ok(MarkOutcome::AlreadyMarked);
        }

        let record = AttendanceRecord::new(name, now);
        self.store.append(&record)?;
        session.marked.insert(name.to_string());

        tracing::info!(name = %record.name, date = %record.date, time = %record.time, "attendance marked");
        Ok(MarkOutcome::Marked(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    struct FailingStore;

    impl AttendanceStore for FailingStore {
        fn append(&mut self, _record: &AttendanceRecord) -> Result<(), StoreError> {
            Err(StoreError::Io {
                path: PathBuf::from("/unavailable"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            })
        }

        fn records(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_record_formats_date_and_time() {
        let record = AttendanceRecord::new("alice", at(9, 5, 3));
        assert_eq!(record.date, "2024-03-07");
        assert_eq!(record.time, "09:05:03");
    }

    #[test]
    fn test_mark_twice_is_idempotent() {
        let mut ledger = AttendanceLedger::new(MemoryStore::new());
        let mut session = Session::new();
        let alice = Identity::Known("alice".into());

        let first = ledger.try_mark(&mut session, &alice, at(9, 0, 0)).unwrap();
        let second = ledger.try_mark(&mut session, &alice, at(9, 0, 1)).unwrap();

        assert_eq!(first, MarkOutcome::Marked(AttendanceRecord::new("alice", at(9, 0, 0))));
        assert_eq!(second, MarkOutcome::AlreadyMarked);
        assert_eq!(ledger.store().records().unwrap().len(), 1);
        assert!(session.contains("alice"));
    }

    #[test]
    fn test_unknown_is_rejected() {
        let mut ledger = AttendanceLedger::new(MemoryStore::new());
        let mut session = Session::new();

        let outcome = ledger.try_mark(&mut session, &Identity::Unknown, at(9, 0, 0)).unwrap();
        assert_eq!(outcome, MarkOutcome::Rejected);
        assert!(session.is_empty());
        assert!(ledger.store().records().unwrap().is_empty());
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let mut ledger = AttendanceLedger::new(MemoryStore::new());
        let mut session = Session::new();

        let outcome = ledger
            .try_mark(&mut session, &Identity::Known("  ".into()), at(9, 0, 0))
            .unwrap();
        assert_eq!(outcome, MarkOutcome::Rejected);
    }

    #[test]
    fn test_unknown_label_as_name_is_rejected() {
        let mut ledger = AttendanceLedger::new(MemoryStore::new());
        let mut session = Session::new();

        let outcome = ledger
            .try_mark(&mut session, &Identity::Known(Identity::UNKNOWN_LABEL.into()), at(9, 0, 0))
            .unwrap();

        assert_eq!(outcome, MarkOutcome::Rejected);
        assert!(ledger.store().records().unwrap().is_empty());
        assert!(session.is_empty());
    }

    #[test]
    fn test_distinct_identities_each_marked_once() {
        let mut ledger = AttendanceLedger::new(MemoryStore::new());
        let mut session = Session::new();

        for (i, name) in ["bob", "alice", "bob", "carol", "alice"].iter().enumerate() {
            ledger
                .try_mark(&mut session, &Identity::Known(name.to_string()), at(10, 0, i as u32))
                .unwrap();
        }

        let names: Vec<String> = ledger
            .into_store()
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["bob", "alice", "carol"]);
        assert_eq!(session.marked(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_separate_sessions_mark_again() {
        let mut ledger = AttendanceLedger::new(MemoryStore::new());
        let alice = Identity::Known("alice".into());

        let mut morning = Session::new();
        ledger.try_mark(&mut morning, &alice, at(9, 0, 0)).unwrap();
        let mut afternoon = Session::new();
        let outcome = ledger.try_mark(&mut afternoon, &alice, at(14, 0, 0)).unwrap();

        assert!(matches!(outcome, MarkOutcome::Marked(_)));
        assert_eq!(ledger.store().records().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_append_leaves_session_unchanged() {
        let mut ledger = AttendanceLedger::new(FailingStore);
        let mut session = Session::new();

        let err = ledger
            .try_mark(&mut session, &Identity::Known("alice".into()), at(9, 0, 0))
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!session.contains("alice"));
    }
}
