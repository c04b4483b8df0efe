//! Object storage abstraction for uploaded buckets.
//!
//! Provides a unified PUT interface over S3, GCS, Azure Blob Storage and the
//! local filesystem. The storage location comes from the output base, which
//! may end in a partial object name (`s3://bucket/job/reduce.`); object keys
//! are formed by appending to that prefix verbatim.

mod azure;
mod gcs;
mod local;
#[cfg(test)]
pub(crate) mod recording;
mod s3;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
    WriteMultipart,
};
use regex::Regex;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, warn};

use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

pub use azure::AzureConfig;
pub use gcs::GcsConfig;
pub use local::LocalConfig;
pub use s3::S3Config;

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Metadata attribute carrying the requested replication factor.
pub const DURABILITY_METADATA_KEY: &str = "durability-level";

/// Storage provider that abstracts over different cloud storage backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
    /// Whether the backend accepts object attributes on PUT.
    pub(crate) supports_attributes: bool,
    /// Whether large objects go through multipart upload.
    pub(crate) supports_multipart: bool,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

// URL patterns for different storage backends
const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.*))?$";
const S3_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.*))?$";
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.*))?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?<protocol>https?)://(?P<endpoint>[^:/]+):(?<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.*))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

const GCS_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-_\.]+)\.storage\.googleapis\.com(/(?P<key>.*))?$";
const GCS_PATH: &str =
    r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.*))?$";
const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.*))?$";

const ABFS_URL: &str = r"^abfss?://(?P<container>[a-z0-9\-]+)@(?P<account>[a-z0-9]+)\.dfs\.core\.windows\.net(/(?P<key>.*))?$";
const AZURE_HTTPS: &str = r"^https://(?P<account>[a-z0-9]+)\.(blob|dfs)\.core\.windows\.net/(?P<container>[a-z0-9\-]+)(/(?P<key>.*))?$";

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Backend {
    S3,
    Gcs,
    Azure,
    Local,
}

fn matchers() -> &'static Vec<(Backend, Vec<Regex>)> {
    static MATCHERS: OnceLock<Vec<(Backend, Vec<Regex>)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("storage URL pattern must compile"))
                .collect::<Vec<_>>()
        };

        vec![
            (
                Backend::S3,
                compile(&[S3_PATH, S3_VIRTUAL, S3_ENDPOINT_URL, S3_URL]),
            ),
            (Backend::Gcs, compile(&[GCS_PATH, GCS_VIRTUAL, GCS_URL])),
            (Backend::Azure, compile(&[ABFS_URL, AZURE_HTTPS])),
            (Backend::Local, compile(&[FILE_URI, FILE_URL, FILE_PATH])),
        ]
    })
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Azure(AzureConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse an output base URL into a backend configuration.
    ///
    /// Everything after the bucket (or directory, for local paths) is kept
    /// verbatim as the key prefix.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        for (backend, patterns) in matchers() {
            if let Some(matches) = patterns.iter().find_map(|r| r.captures(url)) {
                return match backend {
                    Backend::S3 => Ok(Self::parse_s3(&matches)),
                    Backend::Gcs => Ok(Self::parse_gcs(&matches)),
                    Backend::Azure => Ok(Self::parse_azure(&matches)),
                    Backend::Local => Ok(Self::parse_local(&matches)),
                };
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn capture(matches: &regex::Captures, name: &str) -> Option<String> {
        matches.name(name).map(|m| m.as_str().to_string())
    }

    fn parse_s3(matches: &regex::Captures) -> Self {
        let bucket = Self::capture(matches, "bucket").unwrap_or_default();

        let region = std::env::var("AWS_DEFAULT_REGION")
            .ok()
            .or_else(|| Self::capture(matches, "region"));

        let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
            matches.name("endpoint").map(|endpoint| {
                let port = matches
                    .name("port")
                    .and_then(|p| p.as_str().parse::<u16>().ok())
                    .unwrap_or(443);
                let protocol = matches
                    .name("protocol")
                    .map(|p| p.as_str())
                    .unwrap_or("https");
                format!("{}://{}:{}", protocol, endpoint.as_str(), port)
            })
        });

        BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket,
            prefix: Self::capture(matches, "key").unwrap_or_default(),
        })
    }

    fn parse_gcs(matches: &regex::Captures) -> Self {
        BackendConfig::Gcs(GcsConfig {
            bucket: Self::capture(matches, "bucket").unwrap_or_default(),
            prefix: Self::capture(matches, "key").unwrap_or_default(),
        })
    }

    fn parse_azure(matches: &regex::Captures) -> Self {
        BackendConfig::Azure(AzureConfig {
            account: Self::capture(matches, "account").unwrap_or_default(),
            container: Self::capture(matches, "container").unwrap_or_default(),
            prefix: Self::capture(matches, "key").unwrap_or_default(),
        })
    }

    /// Local bases split into a directory and a file name prefix.
    ///
    /// `/out/reduce.` stores under `/out` with prefix `reduce.`; `/out/`
    /// stores under `/out` with an empty prefix.
    fn parse_local(matches: &regex::Captures) -> Self {
        let path = matches.name("path").map(|m| m.as_str()).unwrap_or("");
        let path = path.trim_start_matches('/');

        let (dir, prefix) = match path.rsplit_once('/') {
            Some((dir, prefix)) => (format!("/{dir}"), prefix.to_string()),
            None => ("/".to_string(), path.to_string()),
        };

        BackendConfig::Local(LocalConfig { path: dir, prefix })
    }

    fn canonical_url(&self) -> String {
        match self {
            BackendConfig::S3(s3) => s3.canonical_url(),
            BackendConfig::Gcs(gcs) => gcs.canonical_url(),
            BackendConfig::Azure(azure) => azure.canonical_url(),
            BackendConfig::Local(local) => local.canonical_url(),
        }
    }

    /// The key prefix every object name starts with.
    pub fn prefix(&self) -> &str {
        match self {
            BackendConfig::S3(s3) => &s3.prefix,
            BackendConfig::Gcs(gcs) => &gcs.prefix,
            BackendConfig::Azure(azure) => &azure.prefix,
            BackendConfig::Local(local) => &local.prefix,
        }
    }
}

impl StorageProvider {
    /// Create a storage provider for the given output base with storage options.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let config = BackendConfig::parse_url(url)?;

        let object_store = match &config {
            BackendConfig::S3(s3) => s3.build_store(&options)?,
            BackendConfig::Gcs(gcs) => gcs.build_store(&options)?,
            BackendConfig::Azure(azure) => azure.build_store(&options)?,
            BackendConfig::Local(local) => local.build_store().await?,
        };
        let canonical_url = config.canonical_url();
        debug!(url = %canonical_url, prefix = config.prefix(), "Storage provider ready");

        let remote = !matches!(config, BackendConfig::Local(_));
        Ok(Self {
            // LocalFileSystem rejects PUT attributes
            supports_attributes: remote,
            supports_multipart: remote,
            config,
            object_store,
            canonical_url,
        })
    }

    /// Full object name for a key below the configured prefix.
    pub fn object_key(&self, name: &str) -> String {
        format!("{}{}", self.config.prefix(), name)
    }

    /// Human-readable location of an object, for logs and error messages.
    pub fn display_location(&self, key: &str) -> String {
        format!("{}/{}", self.canonical_url.trim_end_matches('/'), key)
    }

    /// Whether objects of this size should be written with multipart upload.
    pub fn use_multipart(&self, size: u64, threshold: u64) -> bool {
        self.supports_multipart && size >= threshold
    }

    fn effective_attributes(&self, key: &str, attributes: &Attributes) -> Attributes {
        if self.supports_attributes || attributes.is_empty() {
            return attributes.clone();
        }
        warn!(
            key,
            count = attributes.len(),
            "Backend does not support object headers; dropping them"
        );
        Attributes::new()
    }

    /// Put bytes to an object key (already including the prefix).
    pub async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        attributes: &Attributes,
    ) -> Result<(), StorageError> {
        let path = Path::from(key);
        let opts = PutOptions {
            attributes: self.effective_attributes(key, attributes),
            ..Default::default()
        };

        let start = Instant::now();
        let result = self
            .object_store
            .put_opts(&path, PutPayload::from(bytes), opts)
            .await;

        let status = if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        };
        emit!(StorageRequest {
            operation: StorageOperation::Put,
            status,
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)?;
        debug!(key, "Put object");
        Ok(())
    }

    /// Start a multipart upload to an object key (already including the prefix).
    ///
    /// Data handed to the writer is cut into `part_size` parts; at most
    /// `max_parts_in_flight` parts are uploading at once.
    pub async fn put_multipart(
        &self,
        key: &str,
        attributes: &Attributes,
        part_size: usize,
        max_parts_in_flight: usize,
    ) -> Result<MultipartWriter, StorageError> {
        let path = Path::from(key);
        let opts = PutMultipartOpts {
            attributes: self.effective_attributes(key, attributes),
            ..Default::default()
        };

        let start = Instant::now();
        let upload = self
            .object_store
            .put_multipart_opts(&path, opts)
            .await
            .context(ObjectStoreSnafu)?;
        debug!(key, part_size, "Started multipart upload");

        Ok(MultipartWriter {
            inner: WriteMultipart::new_with_chunk_size(upload, part_size.max(1)),
            max_parts_in_flight: max_parts_in_flight.max(1),
            start,
        })
    }

    /// Get the contents of an object key (already including the prefix).
    pub async fn get_object(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = Path::from(key);
        let bytes = self
            .object_store
            .get(&path)
            .await
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// In-memory provider, for tests and embedding.
    pub fn in_memory(prefix: &str) -> Self {
        Self::with_store(Arc::new(object_store::memory::InMemory::new()), prefix)
    }

    /// Provider over an existing object store, treated as a remote backend.
    pub fn with_store(object_store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            config: BackendConfig::Local(LocalConfig {
                path: "/".to_string(),
                prefix: prefix.to_string(),
            }),
            canonical_url: "memory://".to_string(),
            object_store,
            supports_attributes: true,
            supports_multipart: true,
        }
    }
}

/// An in-progress multipart upload.
///
/// Must be ended with [`finish`](Self::finish) or [`abort`](Self::abort);
/// dropping it leaves the upload incomplete on the backend.
pub struct MultipartWriter {
    inner: WriteMultipart,
    max_parts_in_flight: usize,
    start: Instant,
}

impl MultipartWriter {
    /// Append a chunk, waiting while too many parts are in flight.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.inner
            .wait_for_capacity(self.max_parts_in_flight)
            .await
            .context(ObjectStoreSnafu)?;
        self.inner.put(chunk);
        Ok(())
    }

    /// Upload the remaining data and commit the object.
    pub async fn finish(self) -> Result<(), StorageError> {
        let result = self.inner.finish().await;
        let status = if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        };
        emit!(StorageRequest {
            operation: StorageOperation::Multipart,
            status,
            duration: self.start.elapsed(),
        });
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Abandon the upload and discard uploaded parts.
    pub async fn abort(self) -> Result<(), StorageError> {
        emit!(StorageRequest {
            operation: StorageOperation::Multipart,
            status: RequestStatus::Error,
            duration: self.start.elapsed(),
        });
        self.inner.abort().await.context(ObjectStoreSnafu)
    }
}

/// Translate `name: value` headers into object attributes.
///
/// Standard content headers map onto their attribute; anything else is kept
/// as user metadata under its lowercased name. The replication factor, when
/// present, is passed through as metadata as well.
pub fn attributes_from_headers(headers: &[(String, String)], copies: Option<u32>) -> Attributes {
    let mut attributes = Attributes::new();

    for (name, value) in headers {
        let name = name.trim().to_ascii_lowercase();
        let attribute = match name.as_str() {
            "content-type" => Attribute::ContentType,
            "content-encoding" => Attribute::ContentEncoding,
            "content-disposition" => Attribute::ContentDisposition,
            "content-language" => Attribute::ContentLanguage,
            "cache-control" => Attribute::CacheControl,
            _ => Attribute::Metadata(name.into()),
        };
        attributes.insert(attribute, AttributeValue::from(value.trim().to_string()));
    }

    if let Some(copies) = copies {
        attributes.insert(
            Attribute::Metadata(DURABILITY_METADATA_KEY.into()),
            AttributeValue::from(copies.to_string()),
        );
    }

    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn attribute<'a>(attributes: &'a Attributes, key: &Attribute) -> Option<&'a str> {
        attributes.get(key).map(|v| v.as_ref())
    }

    #[test]
    fn test_s3_url_parsing_keeps_partial_prefix() {
        let config = BackendConfig::parse_url("s3://mybucket/jobs/42/reduce.").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "mybucket");
                assert_eq!(s3.prefix, "jobs/42/reduce.");
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_s3_url_parsing_bucket_only() {
        let config = BackendConfig::parse_url("s3://mybucket/").unwrap();
        assert_eq!(config.prefix(), "");
    }

    #[test]
    fn test_gcs_url_parsing() {
        let config = BackendConfig::parse_url("gs://mybucket/path/to/out/").unwrap();
        match config {
            BackendConfig::Gcs(gcs) => {
                assert_eq!(gcs.bucket, "mybucket");
                assert_eq!(gcs.prefix, "path/to/out/");
            }
            _ => panic!("Expected Gcs config"),
        }
    }

    #[test]
    fn test_azure_url_parsing() {
        let config = BackendConfig::parse_url(
            "abfss://mycontainer@mystorageaccount.dfs.core.windows.net/out/part-",
        )
        .unwrap();
        match config {
            BackendConfig::Azure(azure) => {
                assert_eq!(azure.account, "mystorageaccount");
                assert_eq!(azure.container, "mycontainer");
                assert_eq!(azure.prefix, "out/part-");
            }
            _ => panic!("Expected Azure config"),
        }
    }

    #[test]
    fn test_local_url_parsing_splits_file_prefix() {
        let config = BackendConfig::parse_url("/local/out/reduce.").unwrap();
        match config {
            BackendConfig::Local(local) => {
                assert_eq!(local.path, "/local/out");
                assert_eq!(local.prefix, "reduce.");
            }
            _ => panic!("Expected Local config"),
        }

        let config = BackendConfig::parse_url("file:///local/out/").unwrap();
        match config {
            BackendConfig::Local(local) => {
                assert_eq!(local.path, "/local/out");
                assert_eq!(local.prefix, "");
            }
            _ => panic!("Expected Local config"),
        }
    }

    #[test]
    fn test_invalid_url() {
        assert!(BackendConfig::parse_url("ftp://nope").is_err());
        assert!(BackendConfig::parse_url("relative/path").is_err());
    }

    #[test]
    fn test_attributes_from_headers() {
        let headers = vec![
            ("Content-Type".to_string(), " text/plain ".to_string()),
            ("x-job".to_string(), "42".to_string()),
        ];
        let attributes = attributes_from_headers(&headers, Some(3));

        assert_eq!(attributes.len(), 3);
        assert_eq!(
            attribute(&attributes, &Attribute::ContentType),
            Some("text/plain")
        );
        assert_eq!(
            attribute(&attributes, &Attribute::Metadata("x-job".into())),
            Some("42")
        );
        assert_eq!(
            attribute(
                &attributes,
                &Attribute::Metadata(DURABILITY_METADATA_KEY.into())
            ),
            Some("3")
        );
    }

    #[tokio::test]
    async fn test_local_put_get_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let base = format!("{}/out/reduce.", temp_dir.path().display());

        let storage = StorageProvider::for_url_with_options(&base, HashMap::new())
            .await
            .unwrap();

        let key = storage.object_key("run.0");
        assert_eq!(key, "reduce.run.0");

        storage
            .put_object(&key, Bytes::from_static(b"a,1\n"), &Attributes::new())
            .await
            .unwrap();

        let on_disk = std::fs::read(temp_dir.path().join("out/reduce.run.0")).unwrap();
        assert_eq!(on_disk, b"a,1\n");
        assert_eq!(storage.get_object(&key).await.unwrap().as_ref(), b"a,1\n");
    }

    #[tokio::test]
    async fn test_local_put_drops_unsupported_headers() {
        let temp_dir = TempDir::new().unwrap();
        let base = format!("{}/", temp_dir.path().display());
        let storage = StorageProvider::for_url_with_options(&base, HashMap::new())
            .await
            .unwrap();

        let attributes = attributes_from_headers(&[], Some(2));
        storage
            .put_object("x.0", Bytes::from_static(b"data"), &attributes)
            .await
            .unwrap();

        assert_eq!(storage.get_object("x.0").await.unwrap().as_ref(), b"data");
    }

    #[tokio::test]
    async fn test_in_memory_keeps_attributes() {
        let storage = StorageProvider::in_memory("base.");
        let attributes =
            attributes_from_headers(&[("content-type".into(), "text/csv".into())], None);

        let key = storage.object_key("r.1");
        storage
            .put_object(&key, Bytes::from_static(b"x\n"), &attributes)
            .await
            .unwrap();

        let result = storage
            .object_store
            .get(&Path::from(key.as_str()))
            .await
            .unwrap();
        assert_eq!(
            attribute(&result.attributes, &Attribute::ContentType),
            Some("text/csv")
        );
    }

    #[tokio::test]
    async fn test_multipart_writer_commits_with_attributes() {
        let storage = StorageProvider::in_memory("big.");
        assert!(storage.use_multipart(10, 10));
        assert!(!storage.use_multipart(9, 10));

        let attributes =
            attributes_from_headers(&[("content-type".into(), "text/plain".into())], None);
        let key = storage.object_key("r.0");
        let mut writer = storage.put_multipart(&key, &attributes, 4, 2).await.unwrap();
        for chunk in ["abc", "defgh", "ij\n"] {
            writer.write(Bytes::from(chunk)).await.unwrap();
        }
        writer.finish().await.unwrap();

        let result = storage
            .object_store
            .get(&Path::from(key.as_str()))
            .await
            .unwrap();
        assert_eq!(
            attribute(&result.attributes, &Attribute::ContentType),
            Some("text/plain")
        );
        assert_eq!(result.bytes().await.unwrap().as_ref(), b"abcdefghij\n");
    }

    #[tokio::test]
    async fn test_local_backend_skips_multipart() {
        let temp_dir = TempDir::new().unwrap();
        let base = format!("{}/", temp_dir.path().display());
        let storage = StorageProvider::for_url_with_options(&base, HashMap::new())
            .await
            .unwrap();
        assert!(!storage.use_multipart(u64::MAX, 0));
    }
}
