//! Shared application state

use std::sync::Arc;

use crate::config::Config;
use crate::events::EventSink;
use crate::session::{FilenameFilter, SessionLocks, SessionStore};

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: SessionStore,
    filter: FilenameFilter,
    locks: SessionLocks,
    events: EventSink,
}

impl AppState {
    /// Builds the state, compiling the filename filter from the config.
    pub fn new(config: Config, events: EventSink) -> Result<Self, regex::Error> {
        let store = SessionStore::new(&config.temp_root);
        let filter = FilenameFilter::new(&config.allow_patterns, &config.deny_patterns)?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                filter,
                locks: SessionLocks::new(),
                events,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn filter(&self) -> &FilenameFilter {
        &self.inner.filter
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.inner.locks
    }

    pub fn events(&self) -> &EventSink {
        &self.inner.events
    }
}
