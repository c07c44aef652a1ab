use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use pkgmirror_compress::Compression;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::UtcDateTime;

/// JSON document as fetched from upstream or loaded from the mirror store.
///
/// The body is kept exactly as received (gzip or plain); compression is
/// detected from the magic bytes when decoding. Records are never mutated,
/// a refresh produces a new record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    content: Vec<u8>,
    captured_at: i64,
    hash: Option<String>,
    options: BTreeMap<String, String>,
}

impl MetadataRecord {
    pub fn new(content: impl Into<Vec<u8>>, captured_at: i64) -> Self {
        Self {
            content: content.into(),
            captured_at,
            hash: None,
            options: BTreeMap::new(),
        }
    }

    /// Record captured at the current time.
    pub fn now(content: impl Into<Vec<u8>>) -> Self {
        Self::new(content, UtcDateTime::now().unix_timestamp())
    }

    /// Serialize a JSON document into a new record.
    pub fn from_json(value: &Value) -> Result<Self> {
        let content = serde_json::to_vec(value).or_raise(|| ErrorKind::MalformedJson)?;
        Ok(Self::now(content))
    }

    /// Pin the record to a specific upstream revision.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Raw body, possibly compressed.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Unix timestamp (seconds) at which the body was fetched or last written.
    pub fn captured_at(&self) -> i64 {
        self.captured_at
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn is_compressed(&self) -> bool {
        Compression::from_magic_bytes(&self.content) != Compression::None
    }

    /// The uncompressed body.
    pub fn decode(&self) -> Result<Vec<u8>> {
        pkgmirror_compress::decode(&self.content).or_raise(|| ErrorKind::Decode)
    }

    /// The body parsed as a JSON object.
    pub fn json(&self) -> Result<Map<String, Value>> {
        let bytes = self.decode()?;
        match serde_json::from_slice::<Value>(&bytes).or_raise(|| ErrorKind::MalformedJson)? {
            Value::Object(map) => Ok(map),
            _ => exn::bail!(ErrorKind::InvalidData("document is not a JSON object".to_string())),
        }
    }

    /// BLAKE3 hash of the uncompressed body.
    pub fn content_hash(&self) -> Result<String> {
        Ok(blake3::hash(&self.decode()?).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"packages":{"acme/foo":{}}}"#;

    #[test]
    fn test_plain_and_gzip_decode_identically() {
        let plain = MetadataRecord::new(BODY, 100);
        let gzip = MetadataRecord::new(Compression::Gzip.compress(BODY).unwrap(), 100);
        assert!(!plain.is_compressed());
        assert!(gzip.is_compressed());
        assert_eq!(plain.decode().unwrap(), gzip.decode().unwrap());
        assert_eq!(plain.content_hash().unwrap(), gzip.content_hash().unwrap());
        assert!(gzip.json().unwrap().contains_key("packages"));
    }

    #[test]
    fn test_non_object_is_invalid() {
        let record = MetadataRecord::new(&b"[1, 2, 3]"[..], 0);
        let err = record.json().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
        let record = MetadataRecord::new(&b"{not json"[..], 0);
        assert_eq!(*record.json().unwrap_err(), ErrorKind::MalformedJson);
    }

    #[test]
    fn test_builders() {
        let record = MetadataRecord::new(BODY, 42).with_hash("abc").with_option("etag", "W/1");
        assert_eq!(record.captured_at(), 42);
        assert_eq!(record.hash(), Some("abc"));
        assert_eq!(record.option("etag"), Some("W/1"));
        assert_eq!(record.option("missing"), None);
    }
}
