//! The abstract contract the failover core depends on. A handler is
//! polymorphic over three operations: a pure health observation and two
//! idempotent reconfiguration entry points. The controller guarantees
//! `ensure_master`/`ensure_slave` are never called concurrently with each
//! other for a given handler; `health` may run concurrently with either
//! from the HTTP server task, so handlers must make that safe internally
//! (see the example handlers' own locks).

use async_trait::async_trait;

use crate::role::{HealthVerdict, NodeName};

/// Implemented once per managed service (MySQL, Solr, ...). The controller
/// holds a single shared `Arc<dyn AppHandler>` — constructing it twice
/// would give the HTTP server and the controller independently-cached
/// views of the same service.
#[async_trait]
pub trait AppHandler: Send + Sync {
    /// Pure observation of the managed service's health. No side effects
    /// on coordinator state. May be called concurrently with
    /// `ensure_master`/`ensure_slave`.
    async fn health(&self) -> HealthVerdict;

    /// Idempotently drive the managed service to primary/master mode.
    /// May be long-running; must tolerate being called while already
    /// master. May decline to proceed (e.g. still catching up to a
    /// previous master) by returning without effect — the controller
    /// retries on the next tick.
    async fn ensure_master(&self);

    /// Idempotently drive the managed service into replica mode pointed
    /// at `master_node`. Idempotent when already slaved to the same
    /// master; must re-point when `master_node` differs.
    async fn ensure_slave(&self, master_node: NodeName);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every call it receives; used by controller unit tests to
    /// assert idempotence and that `ensure_*` is never invoked on an
    /// unhealthy/disabled tick.
    pub struct RecordingHandler {
        pub verdict: Mutex<HealthVerdict>,
        pub master_calls: Mutex<u32>,
        pub slave_calls: Mutex<Vec<NodeName>>,
    }

    impl RecordingHandler {
        pub fn new(verdict: HealthVerdict) -> Self {
            Self {
                verdict: Mutex::new(verdict),
                master_calls: Mutex::new(0),
                slave_calls: Mutex::new(Vec::new()),
            }
        }

        pub fn set_verdict(&self, verdict: HealthVerdict) {
            *self.verdict.lock().unwrap() = verdict;
        }

        pub fn master_call_count(&self) -> u32 {
            *self.master_calls.lock().unwrap()
        }

        pub fn slave_calls(&self) -> Vec<NodeName> {
            self.slave_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AppHandler for RecordingHandler {
        async fn health(&self) -> HealthVerdict {
            self.verdict.lock().unwrap().clone()
        }

        async fn ensure_master(&self) {
            *self.master_calls.lock().unwrap() += 1;
        }

        async fn ensure_slave(&self, master_node: NodeName) {
            self.slave_calls.lock().unwrap().push(master_node);
        }
    }
}
