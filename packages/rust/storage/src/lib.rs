//! Durable local state: the checkpoint file, the CSV record source, and the
//! append-only CSV output.
//!
//! - [`CheckpointStore`]: atomic load/persist/discard of [`CheckpointState`]
//! - [`CsvRecordSource`]: ordered input records, resumable at any index
//! - [`CsvOutputSink`]: durable appends, reconciled with the checkpoint on resume
//!
//! [`CheckpointState`]: enricher_shared::CheckpointState

pub mod checkpoint;
pub mod csv;
pub mod sink;
pub mod source;

pub use checkpoint::CheckpointStore;
pub use sink::{CsvOutputSink, ENRICHMENT_COLUMNS, output_header};
pub use source::{CsvRecordSource, fingerprint};
