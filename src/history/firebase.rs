use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, warn };
use serde::{ Deserialize, Serialize };
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ ChatFeed, ChatStore, WriteResult };
use crate::error::StoreError;
use crate::firebase::chats_path;
use crate::firebase::database::{ DbEvent, PutOutcome, RealtimeDb };
use crate::models::chat::{ ChatMessage, ChatRecord };
use crate::models::user::SessionContext;

/// What may be found at `users/{uid}/chats`: the versioned record, or a bare
/// message array written before revisions existed.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredChats {
    Versioned(ChatRecord),
    Legacy(Vec<ChatMessage>),
}

impl From<StoredChats> for ChatRecord {
    fn from(stored: StoredChats) -> Self {
        match stored {
            StoredChats::Versioned(record) => record,
            StoredChats::Legacy(messages) => ChatRecord { revision: 0, messages },
        }
    }
}

#[derive(Serialize)]
struct ChatRecordRef<'a> {
    revision: u64,
    messages: &'a [ChatMessage],
}

fn decode_snapshot(data: JsonValue) -> Result<ChatRecord, StoreError> {
    let stored: Option<StoredChats> = serde_json::from_value(data)?;
    Ok(stored.map(ChatRecord::from).unwrap_or_else(ChatRecord::empty))
}

/// A write based on anything but the stored revision is refused up front.
fn stale_base(stored: Option<StoredChats>, expected_revision: u64) -> Option<WriteResult> {
    let current = stored.map(ChatRecord::from).map(|r| r.revision).unwrap_or(0);
    (current != expected_revision).then_some(WriteResult::Conflict { expected: expected_revision, current })
}

/// `latest` is the revision read back after a lost ETag race; ignored otherwise.
fn put_result(outcome: PutOutcome, expected_revision: u64, latest: Option<u64>) -> WriteResult {
    match outcome {
        PutOutcome::Written => WriteResult::Committed(expected_revision + 1),
        PutOutcome::PreconditionFailed => WriteResult::Conflict {
            expected: expected_revision,
            current: latest.unwrap_or(0),
        },
    }
}

pub struct FirebaseChatStore {
    db: RealtimeDb,
}

impl FirebaseChatStore {
    pub fn new(database_url: &str) -> Self {
        Self { db: RealtimeDb::new(database_url) }
    }

    async fn try_save(
        &self,
        ctx: &SessionContext,
        messages: &[ChatMessage],
        expected_revision: u64
    ) -> Result<WriteResult, StoreError> {
        let path = chats_path(&ctx.user_id);
        let (stored, etag) = self.db.get_with_etag::<StoredChats>(&path, &ctx.id_token).await?;
        if let Some(conflict) = stale_base(stored, expected_revision) {
            return Ok(conflict);
        }

        let record = ChatRecordRef { revision: expected_revision + 1, messages };
        let outcome = self.db.put_if_match(&path, &ctx.id_token, &record, &etag).await?;
        let latest = match outcome {
            PutOutcome::Written => None,
            PutOutcome::PreconditionFailed => self.load(ctx).await?.map(|r| r.revision),
        };
        Ok(put_result(outcome, expected_revision, latest))
    }
}

#[async_trait]
impl ChatStore for FirebaseChatStore {
    async fn load(&self, ctx: &SessionContext) -> Result<Option<ChatRecord>, StoreError> {
        let stored = self.db.get::<StoredChats>(&chats_path(&ctx.user_id), &ctx.id_token).await?;
        Ok(stored.map(ChatRecord::from))
    }

    async fn save(
        &self,
        ctx: &SessionContext,
        messages: &[ChatMessage],
        expected_revision: u64
    ) -> WriteResult {
        match self.try_save(ctx, messages, expected_revision).await {
            Ok(result) => result,
            Err(e) => WriteResult::Failed(e),
        }
    }

    async fn subscribe(&self, ctx: &SessionContext) -> Result<ChatFeed, StoreError> {
        let mut events = self.db.stream(&chats_path(&ctx.user_id), &ctx.id_token).await?;
        let db = self.db.clone();
        let ctx = ctx.clone();
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let snapshot = match event {
                    Ok(DbEvent::Put { path, data }) if path == "/" => decode_snapshot(data),
                    // A change below the root: read the whole record again.
                    Ok(DbEvent::Put { .. }) | Ok(DbEvent::Patch { .. }) => {
                        db.get::<StoredChats>(&chats_path(&ctx.user_id), &ctx.id_token).await
                            .map(|stored| stored.map(ChatRecord::from).unwrap_or_else(ChatRecord::empty))
                    }
                    Ok(DbEvent::KeepAlive) => continue,
                    Ok(DbEvent::Cancel) | Ok(DbEvent::AuthRevoked) => {
                        warn!("Chat subscription for {} ended by the server", ctx.user_id);
                        let _ = tx.send(Err(StoreError::Subscription("cancelled by server".to_string()))).await;
                        return;
                    }
                    Err(e) => Err(e),
                };
                if tx.send(snapshot).await.is_err() {
                    debug!("Chat subscription receiver dropped");
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_versioned_records() {
        let record = decode_snapshot(json!({
            "revision": 4,
            "messages": [{"role": "system", "content": "seed"}]
        })).unwrap();
        assert_eq!(record.revision, 4);
        assert_eq!(record.messages, vec![ChatMessage::system("seed")]);
    }

    #[test]
    fn reads_legacy_arrays_as_revision_zero() {
        let record = decode_snapshot(json!([
            {"role": "system", "content": "seed"},
            {"role": "user", "content": "hi"}
        ])).unwrap();
        assert_eq!(record.revision, 0);
        assert_eq!(record.messages.len(), 2);
    }

    #[test]
    fn null_is_an_empty_record() {
        assert_eq!(decode_snapshot(JsonValue::Null).unwrap(), ChatRecord::empty());
    }

    #[test]
    fn write_must_start_from_the_stored_revision() {
        let stored = Some(StoredChats::Versioned(ChatRecord { revision: 3, messages: Vec::new() }));
        assert!(matches!(stale_base(stored, 1), Some(WriteResult::Conflict { expected: 1, current: 3 })));

        let stored = Some(StoredChats::Versioned(ChatRecord { revision: 3, messages: Vec::new() }));
        assert!(stale_base(stored, 3).is_none());

        let legacy = Some(StoredChats::Legacy(vec![ChatMessage::system("seed")]));
        assert!(stale_base(legacy, 0).is_none());
        assert!(stale_base(None, 0).is_none());
        assert!(matches!(stale_base(None, 2), Some(WriteResult::Conflict { expected: 2, current: 0 })));
    }

    #[test]
    fn lost_etag_race_reports_the_reloaded_revision() {
        assert!(matches!(put_result(PutOutcome::Written, 2, None), WriteResult::Committed(3)));
        assert!(
            matches!(put_result(PutOutcome::PreconditionFailed, 2, Some(5)), WriteResult::Conflict { expected: 2, current: 5 })
        );
        assert!(
            matches!(put_result(PutOutcome::PreconditionFailed, 2, None), WriteResult::Conflict { expected: 2, current: 0 })
        );
    }

    #[test]
    fn writes_keep_message_order() {
        let messages = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        let json = serde_json::to_value(ChatRecordRef { revision: 2, messages: &messages }).unwrap();
        assert_eq!(json["messages"][0]["content"], "a");
        assert_eq!(json["messages"][1]["content"], "b");
        assert_eq!(json["revision"], 2);
    }
}
