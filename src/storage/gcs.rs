//! Google Cloud Storage.

use object_store::gcp::{GoogleCloudStorageBuilder, GoogleConfigKey};
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{GcsConfigSnafu, StorageError};

/// Environment variable holding an inline service account key.
const SERVICE_ACCOUNT_KEY_ENV: &str = "GOOGLE_SERVICE_ACCOUNT_KEY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsConfig {
    pub bucket: String,
    pub prefix: String,
}

impl GcsConfig {
    pub(super) fn canonical_url(&self) -> String {
        format!("gs://{}", self.bucket)
    }

    pub(super) fn build_store(
        &self,
        options: &HashMap<String, String>,
    ) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let mut builder = GoogleCloudStorageBuilder::from_env();
        if let Ok(key) = std::env::var(SERVICE_ACCOUNT_KEY_ENV) {
            debug!("Using service account key from {SERVICE_ACCOUNT_KEY_ENV}");
            builder = builder.with_service_account_key(key);
        }
        for (key, value) in options {
            let key: GoogleConfigKey = key.parse().context(GcsConfigSnafu)?;
            builder = builder.with_config(key, value);
        }

        let store = builder
            .with_bucket_name(&self.bucket)
            .with_retry(RetryConfig::default())
            .build()
            .context(GcsConfigSnafu)?;
        Ok(Arc::new(store))
    }
}
