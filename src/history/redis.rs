use async_trait::async_trait;
use futures::StreamExt;
use log::{ error, warn };
use redis::{ AsyncCommands, Client, Script };
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ ChatFeed, ChatStore, WriteResult };
use crate::error::StoreError;
use crate::models::chat::{ ChatMessage, ChatRecord };
use crate::models::user::SessionContext;

// KEYS[1] record, KEYS[2] change channel; ARGV[1] expected revision, ARGV[2] new record JSON.
const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
local revision = 0
if current then
    revision = tonumber(cjson.decode(current)['revision']) or 0
end
if revision ~= tonumber(ARGV[1]) then
    return {0, revision}
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('PUBLISH', KEYS[2], ARGV[2])
return {1, revision + 1}
"#;

/// Maps the `{applied, revision}` pair returned by `COMPARE_AND_SET`.
fn script_outcome(reply: &[i64], expected_revision: u64) -> Result<WriteResult, StoreError> {
    match reply {
        [1, revision] if *revision > 0 => Ok(WriteResult::Committed(*revision as u64)),
        [0, current] if *current >= 0 => Ok(WriteResult::Conflict { expected: expected_revision, current: *current as u64 }),
        other => Err(StoreError::Unavailable(format!("unexpected script reply: {:?}", other))),
    }
}

pub struct RedisChatStore {
    client: Client,
    key_prefix: String,
    script: Script,
}

impl RedisChatStore {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
            script: Script::new(COMPARE_AND_SET),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn record_key(&self, user_id: &str) -> String {
        format!("{}{}:chats", self.key_prefix, user_id)
    }

    fn channel(&self, user_id: &str) -> String {
        format!("{}{}:chats:changes", self.key_prefix, user_id)
    }

    async fn try_save(
        &self,
        user_id: &str,
        messages: &[ChatMessage],
        expected_revision: u64
    ) -> Result<WriteResult, StoreError> {
        let mut conn = self.get_connection().await?;
        let record = ChatRecord { revision: expected_revision + 1, messages: messages.to_vec() };
        let json_record = serde_json::to_string(&record)?;

        let reply: Vec<i64> = self.script
            .key(self.record_key(user_id))
            .key(self.channel(user_id))
            .arg(expected_revision)
            .arg(json_record)
            .invoke_async(&mut conn).await?;

        script_outcome(&reply, expected_revision)
    }
}

#[async_trait]
impl ChatStore for RedisChatStore {
    async fn load(&self, ctx: &SessionContext) -> Result<Option<ChatRecord>, StoreError> {
        let mut conn = self.get_connection().await?;
        let json_record: Option<String> = conn.get(self.record_key(&ctx.user_id)).await?;
        match json_record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        ctx: &SessionContext,
        messages: &[ChatMessage],
        expected_revision: u64
    ) -> WriteResult {
        match self.try_save(&ctx.user_id, messages, expected_revision).await {
            Ok(result) => result,
            Err(e) => WriteResult::Failed(e),
        }
    }

    async fn subscribe(&self, ctx: &SessionContext) -> Result<ChatFeed, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(self.channel(&ctx.user_id)).await?;
        // Subscribe before reading so no write falls between the two.
        let current = self.load(ctx).await?.unwrap_or_else(ChatRecord::empty);

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            if tx.send(Ok(current)).await.is_err() {
                return;
            }
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Ignoring undecodable chat notification: {}", e);
                        continue;
                    }
                };
                match serde_json::from_str::<ChatRecord>(&payload) {
                    Ok(record) => {
                        if tx.send(Ok(record)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        error!("Error parsing chat notification: {}", e);
                    }
                }
            }
            let _ = tx.send(Err(StoreError::Subscription("redis pubsub closed".to_string()))).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
