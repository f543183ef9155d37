//! rollcall-core — face matching and attendance marking.
//!
//! Matches observed face embeddings against a stored gallery with a
//! two-threshold Euclidean gate, and records each accepted identity at most
//! once per session. Faces are encoded with SCRFD detection and ArcFace
//! recognition on ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod gallery;
pub mod ledger;
pub mod recognizer;
pub mod store;
pub mod types;

use std::path::PathBuf;

pub use encoder::{EncoderError, FaceEncoder, OnnxFaceEncoder};
pub use gallery::{Gallery, GalleryError};
pub use ledger::{
    is_markable, AttendanceLedger, AttendanceRecord, AttendanceStore, MarkOutcome, MemoryStore, Session, StoreError,
};
pub use store::CsvAttendanceStore;
pub use types::{
    Embedding, EuclideanMatcher, FaceBox, Identity, MatchPolicy, MatchResult, Matcher, ObservedFace,
    ReferenceEncoding,
};

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
