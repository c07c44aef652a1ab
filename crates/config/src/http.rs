use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings for the HTTP client talking to one upstream registry.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout, covering connect and body.
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Basic auth credentials; the password is ignored without a username.
    pub username: Option<String>,
    pub password: Option<String>,
}
impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: concat!("pkgmirror/", env!("CARGO_PKG_VERSION")).to_string(),
            headers: BTreeMap::new(),
            username: None,
            password: None,
        }
    }
}
impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
