//! Shared application state.
//!
//! `CoreState` is built once at startup, wrapped in `Arc`, and handed to
//! the HTTP layer and to every job driver. It owns no singletons: the
//! store, config source, provider invoker and log sink are all injected.

use std::sync::Arc;
use std::time::Duration;

use crate::ai_config::{ConfigError, ConfigProvider, ConfigSnapshot};
use crate::generation::audit::{AuditRecorder, LogSink};
use crate::generation::invoker::ProviderInvoker;
use crate::jobs::content::ContentStore;
use crate::jobs::delivery::PUSH_TICK;
use crate::jobs::notify::JobNotifier;
use crate::jobs::store::{JobStore, SqliteStore};

pub struct CoreState {
    store: Arc<SqliteStore>,
    config: Arc<dyn ConfigProvider>,
    invoker: Arc<dyn ProviderInvoker>,
    sink: Arc<dyn LogSink>,
    notifier: JobNotifier,
    /// Push-mode re-read interval when no notification arrives.
    push_tick: Duration,
}

impl CoreState {
    pub fn new(
        store: Arc<SqliteStore>,
        config: Arc<dyn ConfigProvider>,
        invoker: Arc<dyn ProviderInvoker>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            store,
            config,
            invoker,
            sink,
            notifier: JobNotifier::new(),
            push_tick: PUSH_TICK,
        }
    }

    pub fn with_push_tick(mut self, tick: Duration) -> Self {
        self.push_tick = tick;
        self
    }

    pub fn jobs(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub fn contents(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    /// Fresh configuration snapshot for one request.
    pub fn config_snapshot(&self) -> Result<ConfigSnapshot, ConfigError> {
        self.config.snapshot()
    }

    pub fn invoker(&self) -> &dyn ProviderInvoker {
        self.invoker.as_ref()
    }

    pub fn sink(&self) -> &dyn LogSink {
        self.sink.as_ref()
    }

    pub fn notifier(&self) -> &JobNotifier {
        &self.notifier
    }

    pub fn push_tick(&self) -> Duration {
        self.push_tick
    }

    /// Recorder bound to this state's stores and sink.
    pub fn recorder<'a>(&'a self, secret: Option<&'a str>) -> AuditRecorder<'a> {
        AuditRecorder::new(self.jobs(), self.contents(), self.sink(), secret)
    }
}
