use futures::StreamExt;
use log::{ debug, info, warn };
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::replies::ReplyBook;
use crate::error::StoreError;
use crate::history::{ ChatStore, WriteResult };
use crate::llm::chat::ChatClient;
use crate::models::chat::{ ChatMessage, ChatRecord, Role };
use crate::models::diagnosis::DiseaseLabel;
use crate::models::user::SessionContext;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Lookup,
    Completion,
    Fallback,
}

/// What one `send` did: the reply appended for the user turn and the outcome
/// of each persistence write it issued (user turn first, reply second).
#[derive(Debug)]
pub struct SendReport {
    pub reply: ChatMessage,
    pub source: ReplySource,
    pub writes: Vec<WriteResult>,
}

impl SendReport {
    pub fn persisted(&self) -> bool {
        self.writes.iter().all(WriteResult::is_committed)
    }
}

struct SessionState {
    messages: Vec<ChatMessage>,
    revision: u64,
    /// How many leading messages mirror the stored record. `None` after a
    /// reset or load: the whole local log is meant to replace the record.
    synced_len: Option<usize>,
}

impl SessionState {
    fn seeded(seed: &str) -> Self {
        Self { messages: vec![ChatMessage::system(seed)], revision: 0, synced_len: Some(1) }
    }
}

/// A log always starts with a system message; anything else gets the seed prepended.
fn with_seed(mut messages: Vec<ChatMessage>, seed: &str) -> Vec<ChatMessage> {
    if messages.first().map(|m| m.role) != Some(Role::System) {
        messages.insert(0, ChatMessage::system(seed));
    }
    messages
}

/// Wholesale replacement by a remote snapshot, unless the snapshot is older
/// than what this session already holds. Only the first snapshot may carry
/// the same revision (a record written before revisions existed is revision 0).
fn apply_snapshot(state: &mut SessionState, record: ChatRecord, seed: &str, first: bool) -> bool {
    let stale = if first { record.revision < state.revision } else { record.revision <= state.revision };
    if stale {
        return false;
    }
    state.messages = with_seed(record.messages, seed);
    state.revision = record.revision;
    state.synced_len = Some(state.messages.len());
    true
}

/// Moves the local log on top of `remote` after a rejected write: messages not
/// yet stored are appended to the remote log, and the next write is based on
/// the remote revision. A reset or loaded log keeps its content.
fn rebase(state: &mut SessionState, remote: ChatRecord, seed: &str) {
    if let Some(synced) = state.synced_len {
        let pending = state.messages.split_off(synced.min(state.messages.len()));
        let mut messages = with_seed(remote.messages, seed);
        state.synced_len = Some(messages.len());
        messages.extend(pending);
        state.messages = messages;
    }
    state.revision = remote.revision;
}

/// One user's conversation with the eggplant doctor, kept in step with the
/// remote chat record.
pub struct ChatSession {
    ctx: SessionContext,
    store: Arc<dyn ChatStore>,
    llm: Arc<dyn ChatClient>,
    replies: Arc<ReplyBook>,
    state: Arc<Mutex<SessionState>>,
    subscription: Option<JoinHandle<()>>,
}

impl ChatSession {
    pub fn new(
        ctx: SessionContext,
        store: Arc<dyn ChatStore>,
        llm: Arc<dyn ChatClient>,
        replies: Arc<ReplyBook>
    ) -> Self {
        let state = SessionState::seeded(&replies.system_prompt);
        Self {
            ctx,
            store,
            llm,
            replies,
            state: Arc::new(Mutex::new(state)),
            subscription: None,
        }
    }

    /// Subscribes to the user's remote chat record. The current record is
    /// applied before returning; later changes are applied in the background.
    pub async fn initialize(&mut self) -> Result<(), StoreError> {
        let mut feed = self.store.subscribe(&self.ctx).await?;
        let seed = self.replies.system_prompt.clone();

        match feed.next().await {
            Some(Ok(record)) => {
                let mut state = self.state.lock().await;
                if apply_snapshot(&mut state, record, &seed, true) {
                    info!("Loaded chat history for {} at revision {}", self.ctx.user_id, state.revision);
                }
            }
            Some(Err(e)) => return Err(e),
            None => return Err(StoreError::Subscription("feed closed before first snapshot".to_string())),
        }

        let state = self.state.clone();
        let user_id = self.ctx.user_id.clone();
        let handle = tokio::spawn(async move {
            while let Some(snapshot) = feed.next().await {
                match snapshot {
                    Ok(record) => {
                        let revision = record.revision;
                        let mut state = state.lock().await;
                        if apply_snapshot(&mut state, record, &seed, false) {
                            debug!("Chat for {} replaced by remote revision {}", user_id, revision);
                        }
                    }
                    Err(e) => {
                        warn!("Chat subscription error for {}: {}", user_id, e);
                    }
                }
            }
            info!("Chat subscription for {} ended", user_id);
        });

        if let Some(previous) = self.subscription.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().await.messages.clone()
    }

    pub async fn revision(&self) -> u64 {
        self.state.lock().await.revision
    }

    /// Appends a user turn, answers it from the reply book or the completion
    /// backend, and persists the full log after each append.
    pub async fn send(&self, text: &str) -> Result<SendReport, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let mut writes = Vec::with_capacity(2);
        let conversation = {
            let mut state = self.state.lock().await;
            state.messages.push(ChatMessage::user(text));
            self.persist(&mut state, &mut writes).await;
            state.messages.clone()
        };

        let (reply, source) = match self.replies.lookup(text) {
            Some(entry) => {
                debug!("Answering from reply book entry '{}'", entry.key);
                (ChatMessage::assistant(entry.reply.clone()), ReplySource::Lookup)
            }
            None => self.complete(&conversation).await,
        };

        {
            let mut state = self.state.lock().await;
            state.messages.push(reply.clone());
            self.persist(&mut state, &mut writes).await;
        }

        Ok(SendReport { reply, source, writes })
    }

    /// Opens a conversation about a diagnosed disease.
    pub async fn seed_from_diagnosis(&self, label: DiseaseLabel) -> Result<SendReport, ChatError> {
        self.send(&format!("Tell me about Eggplant {}", label)).await
    }

    /// Starts over with only the seed message. Nothing is written until the next send.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.messages = vec![ChatMessage::system(self.replies.system_prompt.clone())];
        state.synced_len = None;
    }

    /// Replaces the local log with a previously stored conversation.
    pub async fn load(&self, messages: Vec<ChatMessage>) {
        let mut state = self.state.lock().await;
        state.messages = with_seed(messages, &self.replies.system_prompt);
        state.synced_len = None;
    }

    /// Stops applying remote changes. Snapshots still in flight are dropped.
    pub fn close(mut self) {
        self.stop_subscription();
    }

    fn stop_subscription(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.abort();
        }
    }

    async fn complete(&self, conversation: &[ChatMessage]) -> (ChatMessage, ReplySource) {
        match self.llm.complete(conversation).await {
            Ok(msg) if !msg.content.trim().is_empty() => {
                (ChatMessage::assistant(msg.content), ReplySource::Completion)
            }
            Ok(_) => {
                warn!("Completion backend returned an empty reply for {}", self.ctx.user_id);
                (ChatMessage::assistant(self.replies.fallback_reply.clone()), ReplySource::Fallback)
            }
            Err(e) => {
                warn!("Completion failed for {}: {}", self.ctx.user_id, e);
                (ChatMessage::assistant(self.replies.fallback_reply.clone()), ReplySource::Fallback)
            }
        }
    }

    /// Writes the full log. A write rejected as stale is rebased onto the
    /// stored record and retried once; both outcomes are recorded.
    async fn persist(&self, state: &mut SessionState, writes: &mut Vec<WriteResult>) {
        let first = self.save(state).await;
        let rejected = matches!(first, WriteResult::Conflict { .. });
        writes.push(first);
        if !rejected {
            return;
        }

        match self.store.load(&self.ctx).await {
            Ok(remote) => {
                let remote = remote.unwrap_or_else(ChatRecord::empty);
                debug!("Rebasing chat for {} onto revision {}", self.ctx.user_id, remote.revision);
                rebase(state, remote, &self.replies.system_prompt);
                writes.push(self.save(state).await);
            }
            Err(e) => {
                warn!("Could not reload chat for {} after a conflict: {}", self.ctx.user_id, e);
            }
        }
    }

    async fn save(&self, state: &mut SessionState) -> WriteResult {
        let result = self.store.save(&self.ctx, &state.messages, state.revision).await;
        match &result {
            WriteResult::Committed(revision) => {
                state.revision = *revision;
                state.synced_len = Some(state.messages.len());
            }
            WriteResult::Conflict { expected, current } => {
                warn!(
                    "Chat write for {} rejected: based on revision {}, store is at {}",
                    self.ctx.user_id, expected, current
                );
            }
            WriteResult::Failed(e) => {
                warn!("Chat write for {} failed: {}", self.ctx.user_id, e);
            }
        }
        result
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.stop_subscription();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryChatStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::error::Error as StdError;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct ScriptedClient {
        replies: StdMutex<VecDeque<Result<String, String>>>,
        seen: StdMutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect()
                ),
                seen: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn complete(
            &self,
            messages: &[ChatMessage]
        ) -> Result<ChatMessage, Box<dyn StdError + Send + Sync>> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(text)) => Ok(ChatMessage::assistant(text)),
                Some(Err(e)) => Err(e.into()),
                None => Err("no scripted reply left".into()),
            }
        }

        fn get_model(&self) -> String {
            "scripted".to_string()
        }
    }

    fn ctx() -> SessionContext {
        SessionContext { user_id: "grower".into(), email: "g@farm.pk".into(), id_token: "t".into() }
    }

    fn session(store: &Arc<MemoryChatStore>, llm: &Arc<ScriptedClient>) -> ChatSession {
        ChatSession::new(ctx(), store.clone(), llm.clone(), ReplyBook::builtin())
    }

    async fn wait_for_revision(session: &ChatSession, revision: u64) {
        for _ in 0..100 {
            if session.revision().await >= revision {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("revision {} never arrived", revision);
    }

    #[tokio::test]
    async fn disease_keyword_is_answered_from_the_reply_book() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![]);
        let chat = session(&store, &llm);

        let report = chat.send("My plant has Leaf Spot Disease symptoms").await.unwrap();
        let book = ReplyBook::builtin();
        let expected = &book.lookup("Leaf Spot Disease").unwrap().reply;
        assert_eq!(report.source, ReplySource::Lookup);
        assert_eq!(&report.reply.content, expected);
        assert_eq!(llm.calls(), 0);
        assert!(report.persisted());

        let stored = store.record("grower").unwrap();
        assert_eq!(stored.messages.last().unwrap().content, *expected);
        assert_eq!(stored.messages, chat.messages().await);
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![]);
        let chat = session(&store, &llm);

        for input in ["", "   ", "\n\t"] {
            assert_eq!(chat.send(input).await.unwrap_err(), ChatError::EmptyMessage);
        }
        assert_eq!(chat.messages().await.len(), 1);
        assert_eq!(store.write_count("grower"), 0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn other_questions_go_to_the_completion_backend() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![Ok("Water twice a week.")]);
        let chat = session(&store, &llm);

        let report = chat.send("How often should I water?").await.unwrap();
        assert_eq!(report.source, ReplySource::Completion);
        assert_eq!(report.reply, ChatMessage::assistant("Water twice a week."));

        let seen = llm.seen.lock().unwrap()[0].clone();
        assert_eq!(seen[0].role, Role::System);
        assert_eq!(seen[1], ChatMessage::user("How often should I water?"));
        assert_eq!(store.write_count("grower"), 2);
    }

    #[tokio::test]
    async fn completion_failure_appends_the_apology() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![Err("503 upstream")]);
        let chat = session(&store, &llm);

        let report = chat.send("Why are my fruits small?").await.unwrap();
        assert_eq!(report.source, ReplySource::Fallback);
        let messages = chat.messages().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, ReplyBook::builtin().fallback_reply);
        assert_eq!(store.record("grower").unwrap().messages, messages);
    }

    #[tokio::test]
    async fn reset_leaves_only_the_seed() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![]);
        let chat = session(&store, &llm);
        chat.send("Wilt Disease?").await.unwrap();

        chat.reset().await;
        let messages = chat.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(store.write_count("grower"), 2);

        chat.send("White Mold Disease").await.unwrap();
        let stored = store.record("grower").unwrap();
        assert_eq!(stored.messages.len(), 3);
        assert_eq!(stored.revision, 4);
    }

    #[tokio::test]
    async fn persisted_log_round_trips_through_the_subscription() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![Ok("Sure.")]);
        let writer = session(&store, &llm);
        writer.send("hello").await.unwrap();
        writer.send("Small Leaf Disease").await.unwrap();

        let mut reader = session(&store, &llm);
        reader.initialize().await.unwrap();
        assert_eq!(reader.messages().await, writer.messages().await);
        assert_eq!(reader.revision().await, writer.revision().await);
    }

    #[tokio::test]
    async fn back_to_back_sends_keep_submission_order() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![Ok("Hello, grower.")]);
        let mut chat = session(&store, &llm);
        chat.initialize().await.unwrap();

        chat.send("hello").await.unwrap();
        chat.send("Wilt Disease?").await.unwrap();

        let stored = store.record("grower").unwrap().messages;
        let wilt = ReplyBook::builtin().lookup("wilt disease").unwrap().reply.clone();
        assert_eq!(
            stored[1..].to_vec(),
            vec![
                ChatMessage::user("hello"),
                ChatMessage::assistant("Hello, grower."),
                ChatMessage::user("Wilt Disease?"),
                ChatMessage::assistant(wilt)
            ]
        );
        assert_eq!(stored, chat.messages().await);
    }

    #[tokio::test]
    async fn concurrent_sends_converge_with_the_store() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![Ok("Hello, grower.")]);
        let chat = session(&store, &llm);

        let (first, second) = tokio::join!(chat.send("hello"), chat.send("Wilt Disease?"));
        assert!(first.unwrap().persisted());
        assert!(second.unwrap().persisted());

        let stored = store.record("grower").unwrap().messages;
        assert_eq!(stored, chat.messages().await);
        let users: Vec<_> = stored.iter().filter(|m| m.role == Role::User).map(|m| m.content.as_str()).collect();
        assert_eq!(users, vec!["hello", "Wilt Disease?"]);
        let hello_at = stored.iter().position(|m| m.content == "hello").unwrap();
        let reply_at = stored.iter().position(|m| m.content == "Hello, grower.").unwrap();
        assert!(reply_at > hello_at);
    }

    #[tokio::test]
    async fn persistence_failure_does_not_fail_the_send() {
        let store = Arc::new(MemoryChatStore::new());
        store.set_offline(true);
        let llm = ScriptedClient::new(vec![]);
        let chat = session(&store, &llm);

        let report = chat.send("Mosaic Virus Disease").await.unwrap();
        assert!(!report.persisted());
        assert!(report.writes.iter().all(|w| matches!(w, WriteResult::Failed(_))));
        assert_eq!(chat.messages().await.len(), 3);
    }

    #[tokio::test]
    async fn stale_write_is_rebased_onto_the_stored_log() {
        let store = Arc::new(MemoryChatStore::new());
        let remote = vec![ChatMessage::system("other device"), ChatMessage::user("from phone")];
        store.save(&ctx(), &remote, 0).await;
        let llm = ScriptedClient::new(vec![]);
        let chat = session(&store, &llm);

        let first = chat.send("Small Leaf Disease").await.unwrap();
        assert!(matches!(first.writes[0], WriteResult::Conflict { expected: 0, current: 1 }));
        assert!(matches!(first.writes[1], WriteResult::Committed(2)));
        assert!(matches!(first.writes[2], WriteResult::Committed(3)));

        let second = chat.send("Wilt Disease").await.unwrap();
        assert!(second.persisted());
        assert_eq!(second.writes.len(), 2);

        let stored = store.record("grower").unwrap();
        assert_eq!(stored.revision, 5);
        assert_eq!(stored.messages, chat.messages().await);
        assert_eq!(stored.messages[..2], remote[..]);
        assert_eq!(stored.messages[2], ChatMessage::user("Small Leaf Disease"));
        assert_eq!(stored.messages.len(), 6);
    }

    #[tokio::test]
    async fn reset_log_replaces_a_newer_record() {
        let store = Arc::new(MemoryChatStore::new());
        store.save(&ctx(), &[ChatMessage::system("old"), ChatMessage::user("old question")], 0).await;
        let llm = ScriptedClient::new(vec![]);
        let chat = session(&store, &llm);

        chat.reset().await;
        let report = chat.send("Mosaic Virus Disease").await.unwrap();
        assert!(matches!(report.writes[0], WriteResult::Conflict { .. }));
        let stored = store.record("grower").unwrap();
        assert_eq!(stored.messages, chat.messages().await);
        assert_eq!(stored.messages.len(), 3);
        assert_eq!(stored.messages[1], ChatMessage::user("Mosaic Virus Disease"));
    }

    #[tokio::test]
    async fn remote_changes_replace_the_local_log() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![]);
        let mut chat = session(&store, &llm);
        chat.initialize().await.unwrap();
        chat.send("Insect Pest Disease").await.unwrap();

        let remote = vec![ChatMessage::system("seed"), ChatMessage::user("from phone")];
        assert!(store.save(&ctx(), &remote, 2).await.is_committed());
        wait_for_revision(&chat, 3).await;
        assert_eq!(chat.messages().await, remote);
    }

    #[tokio::test]
    async fn diagnosis_opens_the_conversation() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![]);
        let chat = session(&store, &llm);

        let report = chat.seed_from_diagnosis(DiseaseLabel::WhiteMold).await.unwrap();
        assert_eq!(report.source, ReplySource::Lookup);
        assert_eq!(chat.messages().await[1], ChatMessage::user("Tell me about Eggplant White Mold Disease"));
    }

    #[tokio::test]
    async fn loading_a_stored_conversation_keeps_the_seed() {
        let store = Arc::new(MemoryChatStore::new());
        let llm = ScriptedClient::new(vec![]);
        let chat = session(&store, &llm);

        chat.load(vec![ChatMessage::user("old question")]).await;
        let messages = chat.messages().await;
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1], ChatMessage::user("old question"));

        chat.load(Vec::new()).await;
        assert_eq!(chat.messages().await.len(), 1);
    }

    #[test]
    fn older_snapshots_are_ignored() {
        let mut state = SessionState { messages: vec![ChatMessage::system("s")], revision: 5, synced_len: Some(1) };
        let stale = ChatRecord { revision: 4, messages: vec![ChatMessage::user("old")] };
        assert!(!apply_snapshot(&mut state, stale, "s", false));
        assert_eq!(state.messages, vec![ChatMessage::system("s")]);

        let fresh = ChatRecord { revision: 6, messages: Vec::new() };
        assert!(apply_snapshot(&mut state, fresh, "s", false));
        assert_eq!(state.messages, vec![ChatMessage::system("s")]);
        assert_eq!(state.revision, 6);
    }

    #[test]
    fn rebase_onto_a_deleted_record_keeps_unstored_messages() {
        let mut state = SessionState {
            messages: vec![
                ChatMessage::system("s"),
                ChatMessage::user("stored"),
                ChatMessage::assistant("stored reply"),
                ChatMessage::user("pending")
            ],
            revision: 5,
            synced_len: Some(3),
        };
        rebase(&mut state, ChatRecord::empty(), "s");
        assert_eq!(state.revision, 0);
        assert_eq!(state.messages, vec![ChatMessage::system("s"), ChatMessage::user("pending")]);
        assert_eq!(state.synced_len, Some(1));
    }

    #[test]
    fn first_snapshot_loads_unversioned_history() {
        let mut state = SessionState::seeded("s");
        let legacy = ChatRecord { revision: 0, messages: vec![ChatMessage::system("s"), ChatMessage::user("old")] };
        assert!(!apply_snapshot(&mut state, legacy.clone(), "s", false));
        assert!(apply_snapshot(&mut state, legacy, "s", true));
        assert_eq!(state.messages.len(), 2);
    }
}
