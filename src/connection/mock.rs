//! Recording transport for tests.

use std::sync::{Arc, Mutex};

use super::{CompanionTransport, TransportSink};
use crate::activity::Activity;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open,
    Set(Activity),
    Clear,
    Close,
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    sink: Option<TransportSink>,
}

/// Records every call. With `auto_ready`, each session reports connected
/// and ready as soon as it opens.
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
    auto_ready: bool,
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub struct Probe {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub fn new() -> (Self, Probe) {
        Self::build(false)
    }

    pub fn auto_ready() -> (Self, Probe) {
        Self::build(true)
    }

    fn build(auto_ready: bool) -> (Self, Probe) {
        let inner = Arc::new(Mutex::new(Inner::default()));
        (
            Self {
                inner: inner.clone(),
                auto_ready,
            },
            Probe { inner },
        )
    }

    fn record(&self, call: Call) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

impl CompanionTransport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open(&mut self, sink: TransportSink) {
        self.record(Call::Open);
        if self.auto_ready {
            sink.connected();
            sink.ready();
        }
        self.inner.lock().unwrap().sink = Some(sink);
    }

    fn set_activity(&mut self, activity: &Activity) {
        self.record(Call::Set(activity.clone()));
    }

    fn clear_activity(&mut self) {
        self.record(Call::Clear);
    }

    fn close(&mut self) {
        self.record(Call::Close);
    }
}

impl Probe {
    /// Sink of the most recently opened session.
    pub fn sink(&self) -> TransportSink {
        self.inner
            .lock()
            .unwrap()
            .sink
            .clone()
            .expect("no session opened")
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.inner.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    /// Activities sent so far, in order.
    pub fn sent(&self) -> Vec<Activity> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Set(activity) => Some(activity.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clears(&self) -> usize {
        self.count(|c| matches!(c, Call::Clear))
    }
}
