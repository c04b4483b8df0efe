//! Instrumented in-memory object store for upload tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOpts,
    PutOptions, PutPayload, PutResult, Result, UploadPart,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Request counts observed by a [`RecordingStore`].
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub puts: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub multipart_uploads: AtomicUsize,
    pub part_sizes: Mutex<Vec<usize>>,
    pub aborts: AtomicUsize,
}

/// Wraps [`InMemory`], counting requests and injecting failures.
#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
    inner: InMemory,
    pub counters: Arc<Counters>,
    /// How long each single PUT takes.
    pub put_delay: Duration,
    pub fail_puts: AtomicBool,
    pub fail_parts: AtomicBool,
    /// File deleted while the next PUT is in progress.
    pub remove_during_put: Mutex<Option<PathBuf>>,
}

impl RecordingStore {
    pub fn with_put_delay(put_delay: Duration) -> Self {
        Self {
            put_delay,
            ..Default::default()
        }
    }
}

fn injected() -> object_store::Error {
    object_store::Error::Generic {
        store: "recording",
        source: "injected failure".into(),
    }
}

impl fmt::Display for RecordingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordingStore")
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult> {
        let counters = &self.counters;
        counters.puts.fetch_add(1, Ordering::SeqCst);
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.put_delay).await;
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        let remove = self.remove_during_put.lock().unwrap().take();
        if let Some(path) = remove {
            std::fs::remove_file(path).unwrap();
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>> {
        self.counters
            .multipart_uploads
            .fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.put_multipart_opts(location, opts).await?;
        Ok(Box::new(RecordingUpload {
            inner,
            counters: self.counters.clone(),
            fail_parts: self.fail_parts.load(Ordering::SeqCst),
        }))
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'static, Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

#[derive(Debug)]
struct RecordingUpload {
    inner: Box<dyn MultipartUpload>,
    counters: Arc<Counters>,
    fail_parts: bool,
}

#[async_trait]
impl MultipartUpload for RecordingUpload {
    fn put_part(&mut self, data: PutPayload) -> UploadPart {
        self.counters
            .part_sizes
            .lock()
            .unwrap()
            .push(data.content_length());
        if self.fail_parts {
            return Box::pin(async { Err(injected()) });
        }
        self.inner.put_part(data)
    }

    async fn complete(&mut self) -> Result<PutResult> {
        self.inner.complete().await
    }

    async fn abort(&mut self) -> Result<()> {
        self.counters.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort().await
    }
}
