//! Windowing and reduction of the terminal's per-second history ring buffer.
//!
//! Everything here is synchronous and free of I/O: the poll loop fetches a
//! [`RawHistorySnapshot`], picks the samples it has not seen yet with
//! [`resolve`], then hands them to [`reduce`] or [`extract`].

pub mod bulk;
pub mod concatenate;
pub mod error;
pub mod stats;
pub mod types;
pub mod window;

pub use bulk::{extract, BulkHistory};
pub use concatenate::concatenate;
pub use error::HistoryError;
pub use stats::{reduce, HistoryStats, StatsKind};
pub use types::{FieldValue, RawHistorySnapshot, Samples, StatsGroup, Value};
pub use window::{resolve, SampleRange};
