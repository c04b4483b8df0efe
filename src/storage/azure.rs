//! Azure Blob Storage and ADLS Gen2.

use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AzureConfigSnafu, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    pub account: String,
    pub container: String,
    pub prefix: String,
}

impl AzureConfig {
    pub(super) fn canonical_url(&self) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}",
            self.account, self.container
        )
    }

    pub(super) fn build_store(
        &self,
        options: &HashMap<String, String>,
    ) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let mut builder = MicrosoftAzureBuilder::from_env();
        for (key, value) in options {
            let key: AzureConfigKey = key.parse().context(AzureConfigSnafu)?;
            builder = builder.with_config(key, value);
        }

        let store = builder
            .with_account(&self.account)
            .with_container_name(&self.container)
            .with_retry(RetryConfig::default())
            .build()
            .context(AzureConfigSnafu)?;
        Ok(Arc::new(store))
    }
}
