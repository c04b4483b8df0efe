//! Fan-out coordinator.
//!
//! Reads records, routes each one to its bucket's sink, and pauses reading
//! while any sink is saturated. All routing state lives here and is only
//! touched from the coordinator loop; sinks report back through events.

use bytes::Bytes;
use futures::StreamExt;
use std::collections::BTreeSet;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace};

use super::completion::CompletionState;
use super::input::{Record, RecordDecoder};
use crate::emit;
use crate::error::{PipelineError, SinkError};
use crate::key::KeyExtractor;
use crate::metrics::events::{BlockedSinks, InputPaused, RecordsRouted, SinkSaturated};
use crate::partition::Partitioner;
use crate::sink::{SinkEvent, SinkSet, SinkState, StagedBucket};

/// Counters gathered while routing.
#[derive(Debug, Clone, Default)]
pub struct RoutingStats {
    pub records: u64,
    pub bytes: u64,
    /// Records per bucket, indexed by bucket.
    pub bucket_records: Vec<u64>,
    pub input_pauses: u64,
}

/// Result of a completed fan-out: every bucket's closed staging file.
#[derive(Debug)]
pub struct Handoff {
    pub staged: Vec<StagedBucket>,
    pub stats: RoutingStats,
}

pub struct FanoutCoordinator<'a> {
    extractor: &'a KeyExtractor,
    partitioner: Partitioner,
    sinks: SinkSet,
    states: Vec<SinkState>,
    /// Buckets currently saturated. Input is read only while this is empty.
    blocked: BTreeSet<usize>,
    completion: CompletionState,
    events: mpsc::UnboundedReceiver<SinkEvent>,
    staged: Vec<StagedBucket>,
    stats: RoutingStats,
}

impl<'a> FanoutCoordinator<'a> {
    pub fn new(
        extractor: &'a KeyExtractor,
        partitioner: Partitioner,
        sinks: SinkSet,
        events: mpsc::UnboundedReceiver<SinkEvent>,
    ) -> Self {
        let reducers = sinks.len();
        Self {
            extractor,
            partitioner,
            sinks,
            states: vec![SinkState::Unopened; reducers],
            blocked: BTreeSet::new(),
            completion: CompletionState::new(reducers),
            events,
            staged: Vec::with_capacity(reducers),
            stats: RoutingStats {
                bucket_records: vec![0; reducers],
                ..Default::default()
            },
        }
    }

    fn reducers(&self) -> usize {
        self.states.len()
    }

    /// Route every record of `input`, then wait for all sinks to close.
    pub async fn run<R: AsyncRead + Unpin>(mut self, input: R) -> Result<Handoff, PipelineError> {
        self.wait_for_open().await?;

        let mut records = FramedRead::new(input, RecordDecoder::new());

        loop {
            let can_read = !self.completion.upstream_done() && self.blocked.is_empty();

            tokio::select! {
                biased;

                event = self.events.recv() => {
                    let event = event.ok_or(PipelineError::EventChannelClosed)?;
                    self.handle_event(event)?;
                    if self.completion.take_handoff() {
                        break;
                    }
                }

                record = records.next(), if can_read => {
                    match record {
                        Some(record) => self.route(record?)?,
                        None => {
                            self.finish_input();
                            if self.completion.take_handoff() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        let mut staged = std::mem::take(&mut self.staged);
        staged.sort_by_key(|s| s.bucket);
        info!(
            records = self.stats.records,
            bytes = self.stats.bytes,
            pauses = self.stats.input_pauses,
            "[fanout] All sinks closed"
        );

        Ok(Handoff {
            staged,
            stats: self.stats,
        })
    }

    /// Block until every staging file exists; no record is read before then.
    async fn wait_for_open(&mut self) -> Result<(), PipelineError> {
        let mut opened = 0;
        while opened < self.reducers() {
            let event = self
                .events
                .recv()
                .await
                .ok_or(PipelineError::EventChannelClosed)?;
            if let SinkEvent::Opened { .. } = event {
                opened += 1;
            }
            self.handle_event(event)?;
        }

        for (bucket, state) in self.states.iter_mut().enumerate() {
            state.transition(bucket, SinkState::Writable)?;
        }
        debug!(sinks = opened, "[fanout] All sinks open");
        Ok(())
    }

    fn handle_event(&mut self, event: SinkEvent) -> Result<(), PipelineError> {
        let bucket = event.bucket();
        let Some(state) = self.states.get_mut(bucket) else {
            return Err(SinkError::SinkGone { bucket }.into());
        };

        match event {
            SinkEvent::Opened { .. } => state.transition(bucket, SinkState::Open)?,
            SinkEvent::Drained { .. } => {
                // A drain that races with end of input needs no action.
                if *state == SinkState::Saturated {
                    state.transition(bucket, SinkState::Writable)?;
                }
                if self.blocked.remove(&bucket) {
                    trace!(bucket, "[fanout] Sink drained");
                    emit!(BlockedSinks {
                        count: self.blocked.len()
                    });
                }
            }
            SinkEvent::Closed(staged) => {
                self.completion.sink_closed(bucket, &staged.path)?;
                state.transition(bucket, SinkState::Closed)?;
                emit!(RecordsRouted {
                    bucket,
                    count: self.stats.bucket_records[bucket],
                });
                self.staged.push(staged);
            }
            SinkEvent::Failed { error, .. } => return Err(error.into()),
        }
        Ok(())
    }

    fn route(&mut self, record: Record) -> Result<(), PipelineError> {
        debug_assert!(
            self.blocked.is_empty(),
            "record read while sinks {:?} are saturated",
            self.blocked
        );
        let Record { line, text } = record;

        let bucket = self
            .extractor
            .extract(&text)
            .and_then(|key| self.partitioner.select(&key, self.reducers()));
        let bucket = match bucket {
            Ok(bucket) => bucket,
            Err(source) => {
                return Err(PipelineError::Record {
                    line,
                    record: text,
                    source,
                });
            }
        };

        let mut chunk = text;
        chunk.push('\n');
        let len = chunk.len() as u64;

        let Some(sink) = self.sinks.get(bucket) else {
            return Err(SinkError::SinkGone { bucket }.into());
        };
        let writable = match sink.write(Bytes::from(chunk)) {
            Ok(writable) => writable,
            Err(gone) => return Err(self.writer_failure(bucket).unwrap_or(gone).into()),
        };

        self.stats.records += 1;
        self.stats.bytes += len;
        self.stats.bucket_records[bucket] += 1;

        if !writable {
            self.states[bucket].transition(bucket, SinkState::Saturated)?;
            self.blocked.insert(bucket);
            self.stats.input_pauses += 1;
            emit!(SinkSaturated { bucket });
            emit!(InputPaused);
            emit!(BlockedSinks {
                count: self.blocked.len()
            });
            trace!(bucket, line, "[fanout] Sink saturated, pausing input");
        }
        Ok(())
    }

    /// The error a dead writer queued before going away, if any.
    fn writer_failure(&mut self, bucket: usize) -> Option<SinkError> {
        while let Ok(event) = self.events.try_recv() {
            if let SinkEvent::Failed { bucket: failed, error } = event
                && failed == bucket
            {
                return Some(error);
            }
        }
        None
    }

    /// End of input: no more records for any sink.
    fn finish_input(&mut self) {
        debug!(records = self.stats.records, "[fanout] End of input");
        self.completion.mark_upstream_done();
        for (bucket, state) in self.states.iter_mut().enumerate() {
            // Writable and saturated sinks both move to draining.
            if state.can_become(SinkState::Draining) {
                *state = SinkState::Draining;
            } else {
                trace!(bucket, state = state.as_str(), "[fanout] Sink not draining");
            }
        }
        self.blocked.clear();
        self.sinks.end_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::FieldKey;
    use crate::metrics::capture::CaptureRecorder;
    use crate::sink::StagingConfig;
    use tempfile::TempDir;

    fn staging(dir: &TempDir, high_water_mark: usize) -> StagingConfig {
        StagingConfig {
            dir: dir.path().to_path_buf(),
            process_id: std::process::id(),
            high_water_mark,
        }
    }

    async fn fan_out(
        input: &'static [u8],
        reducers: usize,
        partitioner: Partitioner,
        high_water_mark: usize,
    ) -> (TempDir, Result<Handoff, PipelineError>) {
        let dir = TempDir::new().unwrap();
        let extractor = KeyExtractor::Fields(FieldKey::new(",", vec![1]));
        let (events_tx, events) = mpsc::unbounded_channel();
        let sinks = SinkSet::spawn(reducers, &staging(&dir, high_water_mark), events_tx);

        let result = FanoutCoordinator::new(&extractor, partitioner, sinks, events)
            .run(input)
            .await;
        (dir, result)
    }

    fn contents(staged: &StagedBucket) -> String {
        std::fs::read_to_string(&staged.path).unwrap()
    }

    #[tokio::test]
    async fn test_same_key_same_bucket_in_order() {
        let (_dir, result) = fan_out(b"a,1\nb,2\na,3\n", 2, Partitioner::Hash, 1024).await;
        let handoff = result.unwrap();

        assert_eq!(handoff.staged.len(), 2);
        assert_eq!(handoff.stats.records, 3);

        let a_bucket = crate::partition::hash_bucket(b"a", 2);
        let a_contents = contents(&handoff.staged[a_bucket]);
        assert!(a_contents.contains("a,1\n"));
        assert!(a_contents.find("a,1").unwrap() < a_contents.find("a,3").unwrap());

        let total: u64 = handoff.staged.iter().map(|s| s.records).sum();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_index_mode_routes_to_named_bucket() {
        let (_dir, result) = fan_out(b"2,x\n0,y\n2,z", 3, Partitioner::Index, 1024).await;
        let handoff = result.unwrap();

        assert_eq!(contents(&handoff.staged[0]), "0,y\n");
        assert_eq!(contents(&handoff.staged[1]), "");
        assert_eq!(contents(&handoff.staged[2]), "2,x\n2,z\n");
        assert_eq!(handoff.stats.bucket_records, vec![1, 0, 2]);
    }

    #[tokio::test]
    async fn test_out_of_range_bucket_is_fatal() {
        let (_dir, result) = fan_out(b"1,a\n5,b\n", 3, Partitioner::Index, 1024).await;
        match result.unwrap_err() {
            PipelineError::Record { line, record, .. } => {
                assert_eq!(line, 2);
                assert_eq!(record, "5,b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_backpressure_pauses_and_resumes() {
        let (_dir, result) = fan_out(
            b"k,aaaaaaaa\nk,bbbbbbbb\nk,cccccccc\nk,dddddddd\n",
            1,
            Partitioner::Hash,
            8,
        )
        .await;
        let handoff = result.unwrap();

        // Every record is larger than the mark, so each write saturates.
        assert_eq!(handoff.stats.input_pauses, 4);
        assert_eq!(
            contents(&handoff.staged[0]),
            "k,aaaaaaaa\nk,bbbbbbbb\nk,cccccccc\nk,dddddddd\n"
        );
    }

    #[tokio::test]
    async fn test_saturated_sink_pauses_reads_for_other_buckets() {
        // Bucket 1 has room, but its record must wait until bucket 0 drains.
        let (_dir, result) = fan_out(b"0,aaaaaaaa\n1,b\n0,c\n", 2, Partitioner::Index, 8).await;
        let handoff = result.unwrap();

        assert_eq!(handoff.stats.input_pauses, 1);
        assert_eq!(handoff.stats.bucket_records, vec![2, 1]);
        assert_eq!(contents(&handoff.staged[0]), "0,aaaaaaaa\n0,c\n");
        assert_eq!(contents(&handoff.staged[1]), "1,b\n");
    }

    #[tokio::test]
    async fn test_routed_records_counted_once_per_bucket() {
        let recorder = CaptureRecorder::default();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let (_dir, result) = fan_out(b"0,a\n2,b\n0,c\n0,d\n", 3, Partitioner::Index, 1024).await;
        result.unwrap();

        let mut routed: Vec<(String, u64)> = recorder
            .increments("sleet_records_routed_total")
            .into_iter()
            .map(|i| (i.labels[0].1.clone(), i.value))
            .collect();
        routed.sort();
        assert_eq!(
            routed,
            vec![
                ("0".to_string(), 3),
                ("1".to_string(), 0),
                ("2".to_string(), 1)
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_input_closes_every_sink() {
        let (_dir, result) = fan_out(b"", 4, Partitioner::Hash, 1024).await;
        let handoff = result.unwrap();
        assert_eq!(handoff.staged.len(), 4);
        assert!(handoff.staged.iter().all(|s| s.bytes == 0));
        assert_eq!(handoff.stats.records, 0);
    }

    #[tokio::test]
    async fn test_staging_failure_is_fatal() {
        let extractor = KeyExtractor::Fields(FieldKey::new(",", vec![1]));
        let config = StagingConfig {
            dir: std::path::PathBuf::from("/nonexistent/sleet-staging"),
            process_id: 1,
            high_water_mark: 16,
        };
        let (events_tx, events) = mpsc::unbounded_channel();
        let sinks = SinkSet::spawn(2, &config, events_tx);

        let err = FanoutCoordinator::new(&extractor, Partitioner::Hash, sinks, events)
            .run(&b"a,1\n"[..])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Sink {
                source: SinkError::CreateStaging { .. }
            }
        ));
    }
}
