use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{ AtomicBool, Ordering };
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{ ChatFeed, ChatStore, WriteResult };
use crate::error::StoreError;
use crate::models::chat::{ ChatMessage, ChatRecord };
use crate::models::user::SessionContext;

type Subscriber = mpsc::UnboundedSender<Result<ChatRecord, StoreError>>;

#[derive(Default)]
struct Entry {
    record: Option<ChatRecord>,
    writes: usize,
    subscribers: Vec<Subscriber>,
}

/// Process-local chat store. Used for offline runs and as the remote double in tests.
#[derive(Default)]
pub struct MemoryChatStore {
    entries: Mutex<HashMap<String, Entry>>,
    offline: AtomicBool,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of accepted writes for a user.
    pub fn write_count(&self, user_id: &str) -> usize {
        self.entries.lock().map(|e| e.get(user_id).map(|x| x.writes).unwrap_or(0)).unwrap_or(0)
    }

    pub fn record(&self, user_id: &str) -> Option<ChatRecord> {
        self.entries.lock().ok().and_then(|e| e.get(user_id).and_then(|x| x.record.clone()))
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn load(&self, ctx: &SessionContext) -> Result<Option<ChatRecord>, StoreError> {
        self.check_online()?;
        let entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        Ok(entries.get(&ctx.user_id).and_then(|e| e.record.clone()))
    }

    async fn save(
        &self,
        ctx: &SessionContext,
        messages: &[ChatMessage],
        expected_revision: u64
    ) -> WriteResult {
        if let Err(e) = self.check_online() {
            return WriteResult::Failed(e);
        }
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => return WriteResult::Failed(Self::poisoned()),
        };
        let entry = entries.entry(ctx.user_id.clone()).or_default();
        let current = entry.record.as_ref().map(|r| r.revision).unwrap_or(0);
        if current != expected_revision {
            return WriteResult::Conflict { expected: expected_revision, current };
        }

        let record = ChatRecord { revision: current + 1, messages: messages.to_vec() };
        entry.record = Some(record.clone());
        entry.writes += 1;
        entry.subscribers.retain(|tx| tx.send(Ok(record.clone())).is_ok());
        WriteResult::Committed(record.revision)
    }

    async fn subscribe(&self, ctx: &SessionContext) -> Result<ChatFeed, StoreError> {
        self.check_online()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        let entry = entries.entry(ctx.user_id.clone()).or_default();
        let current = entry.record.clone().unwrap_or_else(ChatRecord::empty);
        // Receiver is alive, the initial send cannot fail.
        let _ = tx.send(Ok(current));
        entry.subscribers.push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
