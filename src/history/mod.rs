//! Download history persistence

pub mod store;

pub use store::{FileKind, HistoryRecord, HistoryStatus, HistoryStore};
