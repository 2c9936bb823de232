//! ZIP archive parsing and appending.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`appender`]: Adds entries to an existing archive in place
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Appending therefore only rewrites the tail: new local headers go where
//! the Central Directory used to start, and a longer Central Directory
//! plus a new EOCD follow them. Everything before stays byte-identical.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB and archives with many entries
//! - Archives with prepended data (launcher stubs)
//! - Existing entries of any method are kept as they are; new entries are STORED
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No compression for appended entries

mod appender;
mod parser;
mod structures;

pub use appender::ZipAppender;
pub use parser::{CentralDirectory, ZipParser};
pub use structures::*;
