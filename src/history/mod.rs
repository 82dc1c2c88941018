mod firebase;
mod memory;
mod redis;

use async_trait::async_trait;
use futures::Stream;
use log::info;
use std::pin::Pin;
use std::sync::Arc;
use crate::cli::Args;
use crate::config::{ self, ConfigError, HistoryType };
use crate::error::StoreError;
use crate::models::chat::{ ChatMessage, ChatRecord };
use crate::models::user::SessionContext;

pub use self::firebase::FirebaseChatStore;
pub use self::memory::MemoryChatStore;
pub use self::redis::RedisChatStore;

/// Snapshots of one user's chat record, in the order the store produced them.
pub type ChatFeed = Pin<Box<dyn Stream<Item = Result<ChatRecord, StoreError>> + Send>>;

/// Outcome of persisting a full chat log.
#[derive(Debug)]
pub enum WriteResult {
    /// Stored under the given revision.
    Committed(u64),
    /// The stored record moved on since `expected`; nothing was written.
    Conflict { expected: u64, current: u64 },
    Failed(StoreError),
}

impl WriteResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteResult::Committed(_))
    }
}

/// Remote home of the per-user chat log (`users/{uid}/chats`).
///
/// Writes always carry the whole log and name the revision they were based
/// on; a store accepts the write only if that is still the stored revision.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn load(&self, ctx: &SessionContext) -> Result<Option<ChatRecord>, StoreError>;

    async fn save(
        &self,
        ctx: &SessionContext,
        messages: &[ChatMessage],
        expected_revision: u64
    ) -> WriteResult;

    /// Standing subscription. The current record (or an empty one) is
    /// delivered first, then every later change.
    async fn subscribe(&self, ctx: &SessionContext) -> Result<ChatFeed, StoreError>;
}

pub fn create_chat_store(args: &Args) -> Result<Arc<dyn ChatStore>, ConfigError> {
    let store: Arc<dyn ChatStore> = match config::history_type(args)? {
        HistoryType::Firebase => {
            let url = config::require_opt(&args.firebase_database_url, "FIREBASE_DATABASE_URL")?;
            Arc::new(FirebaseChatStore::new(&url))
        }
        HistoryType::Redis => {
            let store = RedisChatStore::new(&args.history_host, &args.history_redis_prefix)
                .map_err(|e| ConfigError::Invalid(format!("HISTORY_HOST: {}", e)))?;
            Arc::new(store)
        }
        HistoryType::Memory => Arc::new(MemoryChatStore::new()),
    };
    info!("Chat history will be stored in: {}", args.history_type);
    Ok(store)
}
