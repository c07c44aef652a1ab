//! Mirroring of Composer package repositories.
//!
//! A [`Mirror`] bundles the pieces for one upstream repository:
//!
//! - [`MetadataStore`]: documents on disk, one file per name and hash;
//! - [`ApprovalStore`] and [`StatsStore`]: shared state in the key-value store;
//! - [`SyncOrchestrator`]: bulk refresh from upstream;
//! - [`facade`]: request-time reads, fetching lazily and enforcing access;
//! - [`DistResolver`]: archive downloads.

pub mod approval;
pub mod dist;
pub mod error;
pub mod facade;
mod handle;
pub mod stats;
pub mod store;
pub mod sync;

pub use crate::approval::ApprovalStore;
pub use crate::dist::DistResolver;
pub use crate::facade::{AclFacade, CallerScope, MetadataSource, OnDemandFacade, SourceHandle};
pub use crate::handle::Mirror;
pub use crate::stats::StatsStore;
pub use crate::store::MetadataStore;
pub use crate::sync::{SyncFlags, SyncOrchestrator};
