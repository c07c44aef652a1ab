//! Storage backends for the mirror's filesystem-as-database.
//!
//! Every mirrored document lives at a path derived from its name (and content
//! hash, where one exists), so the storage layer only needs plain CRUD plus
//! atomic replacement. See [`StorageBackend`].

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
