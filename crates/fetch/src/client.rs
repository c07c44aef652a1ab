use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use pkgmirror_config::HttpConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

pub type ClientHandle = Arc<dyn HttpClient + Send + Sync>;

/// A whole response, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body of a successful response.
    ///
    /// 404 and 410 map to [`NotFound`](ErrorKind::NotFound) so callers can
    /// tell "absent upstream" apart from other failures.
    pub fn into_body(self, url: &Url) -> Result<Vec<u8>> {
        match self.status {
            404 | 410 => exn::bail!(ErrorKind::NotFound(url.to_string())),
            _ if self.is_success() => Ok(self.body),
            status => exn::bail!(ErrorKind::Status {
                status,
                url: url.to_string(),
            }),
        }
    }
}

/// Minimal HTTP surface the mirror needs: fetch a whole body.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a GET and return the response without judging its status. Only
    /// a request that never produced a response is an error.
    async fn send(&self, url: &Url) -> Result<HttpResponse>;

    /// GET a document that must exist.
    async fn get(&self, url: &Url) -> Result<Vec<u8>> {
        self.send(url).await?.into_body(url)
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
    username: Option<String>,
    password: Option<String>,
}

impl ReqwestClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Accept", HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).or_raise(|| ErrorKind::Client)?;
            let value = HeaderValue::from_str(value).or_raise(|| ErrorKind::Client)?;
            default_headers.insert(name, value);
        }
        let client = Client::builder()
            .default_headers(default_headers)
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()
            .or_raise(|| ErrorKind::Client)?;
        Ok(Self {
            client,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn send(&self, url: &Url) -> Result<HttpResponse> {
        let mut request = self.client.get(url.clone());
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }
        let response = request.send().await.or_raise(|| ErrorKind::Transport(url.to_string()))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.or_raise(|| ErrorKind::Transport(url.to_string()))?;
        debug!(status, size = body.len(), "fetched");
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}
