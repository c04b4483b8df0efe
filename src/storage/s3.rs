//! Amazon S3 and S3-compatible endpoints.

use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{S3ConfigSnafu, StorageError};

/// Where S3 objects go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    /// Custom endpoint (MinIO, LocalStack); path-style requests over plain HTTP allowed.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: String,
    pub prefix: String,
}

impl S3Config {
    pub(super) fn canonical_url(&self) -> String {
        match (&self.endpoint, &self.region) {
            (Some(endpoint), _) => format!("s3::{endpoint}/{}", self.bucket),
            (None, Some(region)) => format!("https://s3.{region}.amazonaws.com/{}", self.bucket),
            (None, None) => format!("s3://{}", self.bucket),
        }
    }

    /// Build the store. Explicit storage options win over the environment,
    /// and values parsed from the output base win over both.
    pub(super) fn build_store(
        &self,
        options: &HashMap<String, String>,
    ) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let builder = options.iter().try_fold(
            AmazonS3Builder::from_env(),
            |builder, (key, value)| -> Result<_, StorageError> {
                let key: AmazonS3ConfigKey = key.parse().context(S3ConfigSnafu)?;
                Ok(builder.with_config(key, value))
            },
        )?;

        let mut builder = builder
            .with_bucket_name(&self.bucket)
            .with_retry(RetryConfig::default());
        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(true);
        }

        Ok(Arc::new(builder.build().context(S3ConfigSnafu)?))
    }
}
