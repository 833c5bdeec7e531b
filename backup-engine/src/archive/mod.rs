//! Single-file backup archive, built incrementally across chunks.
//!
//! Layout inside the zip container:
//!
//! ```text
//! <files_root>/<relative path>   site files
//! database.sql                    logical database dump
//! backup-manifest.json            manifest record, written last
//! ```

pub mod reader;
pub mod writer;

pub use reader::{ArchiveReader, ExtractSummary};
pub use writer::{AddOutcome, ArchiveWriter, Compression};
