//! Local filesystem output, mostly for testing and single-host runs.

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use snafu::prelude::*;
use std::sync::Arc;

use crate::error::{IoSnafu, ObjectStoreSnafu, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    /// Directory objects are written into.
    pub path: String,
    /// File name prefix for every object.
    pub prefix: String,
}

impl LocalConfig {
    pub(super) fn canonical_url(&self) -> String {
        format!("file://{}", self.path)
    }

    /// The output directory is created if missing.
    pub(super) async fn build_store(&self) -> Result<Arc<dyn ObjectStore>, StorageError> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .context(IoSnafu)?;
        let store = LocalFileSystem::new_with_prefix(&self.path).context(ObjectStoreSnafu)?;
        Ok(Arc::new(store))
    }
}
