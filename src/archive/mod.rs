//! Streaming archive export
//!
//! Bulk download: a selection of virtual paths is packed into a single
//! archive streamed to the client as it is produced. Seven container
//! formats are supported; the format is fixed per request before the first
//! body byte. The reverse direction (in-place zip extraction) lives here
//! too.

pub mod exporter;
pub mod extract;
pub mod format;
pub mod writer;

pub use exporter::export;
pub use extract::unzip;
pub use format::ArchiveFormat;
pub use writer::{ArchiveWriter, Sink};
