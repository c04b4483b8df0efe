//! End-of-run bookkeeping.
//!
//! Upload may start only once the input is exhausted and every sink has
//! flushed its staging file. `CompletionState` tracks both conditions and
//! hands off exactly once.

use std::path::Path;

use crate::error::SinkError;

#[derive(Debug)]
pub struct CompletionState {
    upstream_done: bool,
    open_sinks: usize,
    handed_off: bool,
}

impl CompletionState {
    pub fn new(reducers: usize) -> Self {
        Self {
            upstream_done: false,
            open_sinks: reducers,
            handed_off: false,
        }
    }

    /// Input has been fully read.
    pub fn upstream_done(&self) -> bool {
        self.upstream_done
    }

    pub fn mark_upstream_done(&mut self) {
        self.upstream_done = true;
    }

    /// Every sink has closed.
    pub fn all_sinks_closed(&self) -> bool {
        self.open_sinks == 0
    }

    /// Record a sink close. Closing before end of input is an error.
    pub fn sink_closed(&mut self, bucket: usize, path: &Path) -> Result<(), SinkError> {
        if !self.upstream_done {
            return Err(SinkError::ClosedPrematurely {
                bucket,
                path: path.to_path_buf(),
            });
        }
        self.open_sinks = self.open_sinks.saturating_sub(1);
        Ok(())
    }

    /// True exactly once: the first call after both conditions hold.
    pub fn take_handoff(&mut self) -> bool {
        if self.handed_off || !self.upstream_done || !self.all_sinks_closed() {
            return false;
        }
        self.handed_off = true;
        true
    }
}
