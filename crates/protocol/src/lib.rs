//! Composer repository protocol types.
//!
//! Parsing and derivation only, no I/O: root documents and the [`Protocol`]
//! they imply, metadata records with transparent gzip, the minified v2
//! encoding, and [`RepositoryOptions`], the derived view of one mirror used to
//! build every upstream URL.

pub mod error;
pub mod minify;
mod options;
mod record;
mod root;

pub use crate::options::{RepositoryOptions, SyncStats};
pub use crate::record::MetadataRecord;
pub use crate::root::{DistMirror, Include, Protocol, ProviderInclude, RootDocument};
