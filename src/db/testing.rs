//! In-memory engine for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::driver::Engine;
use super::error::{DbError, Result};

#[derive(Debug)]
pub struct MemoryHandle {
    pub id: usize,
    pub uri: String,
    closed: AtomicBool,
}

impl MemoryHandle {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    fail_open: AtomicBool,
    fail_close_for: Mutex<Option<String>>,
    open_delay: Mutex<Option<Duration>>,
}

/// Engine that records every open and close.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    state: Arc<MemoryState>,
}

impl MemoryEngine {
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.opened() - self.closed()
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make `close` fail for handles whose URI contains `needle`.
    pub fn fail_close_for(&self, needle: &str) {
        *self.state.fail_close_for.lock().unwrap() = Some(needle.to_string());
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    type Handle = Arc<MemoryHandle>;

    fn name(&self) -> &'static str {
        "Memory"
    }

    fn scheme(&self) -> &'static str {
        "memory"
    }

    fn default_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("pool".to_string(), json!(4));
        options
    }

    async fn open(&self, uri: &str) -> Result<Self::Handle> {
        let delay = *self.state.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(DbError::operation("Memory", "connect", "connection refused"));
        }

        let id = self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryHandle {
            id,
            uri: uri.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self, handle: Self::Handle) -> Result<()> {
        let fail_for = self.state.fail_close_for.lock().unwrap().clone();
        if let Some(needle) = fail_for {
            if handle.uri.contains(&needle) {
                return Err(DbError::operation("Memory", "close", "socket already gone"));
            }
        }
        handle.closed.store(true, Ordering::SeqCst);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self, handle: &Self::Handle) -> Result<()> {
        if handle.is_closed() {
            return Err(DbError::operation("Memory", "ping", "connection closed"));
        }
        Ok(())
    }
}
