//! In-process providers: a mutable structured map and a raw byte buffer.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::debug;

use conflux_core::Result;

use crate::merge::{merge_into, set_path};
use crate::parser::Parser;
use crate::provider::{Provider, ProviderKind, WatchCallback, Watchable};

/// A structured map held in memory. Every mutation notifies the watcher, so
/// a manager watching it reloads on `set`/`merge`.
#[derive(Default)]
pub struct MemoryProvider {
    name: String,
    data: RwLock<Map<String, Value>>,
    callback: Mutex<Option<WatchCallback>>,
}

impl MemoryProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_data(self, data: Map<String, Value>) -> Self {
        *self.data.write() = data;
        self
    }

    /// Set the value at a dotted path, creating intermediate maps.
    pub fn set(&self, path: &str, value: Value) {
        let parts: Vec<&str> = path.split('.').collect();
        set_path(&mut self.data.write(), &parts, value);
        self.notify();
    }

    /// Deep-merge `data` over the current contents.
    pub fn merge(&self, data: Map<String, Value>) {
        merge_into(&mut self.data.write(), data);
        self.notify();
    }

    pub fn replace(&self, data: Map<String, Value>) {
        *self.data.write() = data;
        self.notify();
    }

    fn notify(&self) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            debug!(provider = %self.name, "Memory provider changed");
            callback(Ok(()));
        }
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Structured
    }

    async fn read(&self) -> Result<Map<String, Value>> {
        Ok(self.data.read().clone())
    }

    fn as_watchable(&self) -> Option<&dyn Watchable> {
        Some(self)
    }

    fn close(&self) -> Result<()> {
        self.unwatch()
    }
}

impl Watchable for MemoryProvider {
    fn watch(&self, callback: WatchCallback) -> Result<()> {
        let mut slot = self.callback.lock();
        if slot.is_none() {
            *slot = Some(callback);
        }
        Ok(())
    }

    fn unwatch(&self) -> Result<()> {
        self.callback.lock().take();
        Ok(())
    }

    fn is_watching(&self) -> bool {
        self.callback.lock().is_some()
    }
}

/// A fixed document in memory. Parsed as JSON unless another parser is
/// attached with [`with_parser`](Self::with_parser).
pub struct BytesProvider {
    bytes: Vec<u8>,
    parser: Option<Arc<dyn Parser>>,
}

impl BytesProvider {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            parser: None,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = Some(parser);
        self
    }
}

#[async_trait]
impl Provider for BytesProvider {
    fn name(&self) -> String {
        "bytes".to_string()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::RawBytes
    }

    async fn read(&self) -> Result<Map<String, Value>> {
        let parser = self.required_parser().unwrap_or_else(|| Arc::new(crate::parser::JsonParser));
        parser.parse(&self.name(), &self.bytes)
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn required_parser(&self) -> Option<Arc<dyn Parser>> {
        self.parser.clone()
    }
}
