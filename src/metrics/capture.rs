//! Recorder that captures counter increments, for tests.

use metrics::{
    Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use std::sync::{Arc, Mutex};

/// One `increment` call on a counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Increment {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: u64,
}

/// Captures every counter increment; gauges and histograms are dropped.
#[derive(Debug, Default, Clone)]
pub(crate) struct CaptureRecorder {
    increments: Arc<Mutex<Vec<Increment>>>,
}

impl CaptureRecorder {
    /// Increments recorded for a counter name, in call order.
    pub fn increments(&self, name: &str) -> Vec<Increment> {
        self.increments
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.name == name)
            .cloned()
            .collect()
    }
}

struct CapturedCounter {
    name: String,
    labels: Vec<(String, String)>,
    increments: Arc<Mutex<Vec<Increment>>>,
}

impl CounterFn for CapturedCounter {
    fn increment(&self, value: u64) {
        self.increments.lock().unwrap().push(Increment {
            name: self.name.clone(),
            labels: self.labels.clone(),
            value,
        });
    }

    fn absolute(&self, _value: u64) {}
}

impl Recorder for CaptureRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CapturedCounter {
            name: key.name().to_string(),
            labels: key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect(),
            increments: self.increments.clone(),
        }))
    }

    fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}
