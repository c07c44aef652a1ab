//! Fetching Composer repository documents.
//!
//! [`HttpClient`] is the only seam to the network; [`FetchLoop`] fans work
//! out over it with bounded concurrency and cooperative cancellation, and the
//! [`strategy`] modules know which URLs each protocol variant needs.

mod client;
pub mod error;
mod fetch_loop;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod strategy;

pub use crate::client::{ClientHandle, HttpClient, HttpResponse, ReqwestClient};
pub use crate::fetch_loop::{FetchLoop, Progress};
pub use crate::strategy::fetch_root;
pub use tokio_util::sync::CancellationToken;
