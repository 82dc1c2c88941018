use futures::{ Stream, StreamExt };
use log::{ debug, warn };
use reqwest::header::{ ACCEPT, ETAG, IF_MATCH };
use reqwest::{ Client as HttpClient, StatusCode };
use serde::de::DeserializeOwned;
use serde::{ Deserialize, Serialize };
use serde_json::Value as JsonValue;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::StoreError;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<DbEvent, StoreError>> + Send>>;

/// One server-sent event from a Realtime Database streaming GET.
#[derive(Debug, Clone, PartialEq)]
pub enum DbEvent {
    Put { path: String, data: JsonValue },
    Patch { path: String, data: JsonValue },
    KeepAlive,
    Cancel,
    AuthRevoked,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    PreconditionFailed,
}

#[derive(Deserialize)]
struct EventPayload {
    path: String,
    data: JsonValue,
}

/// REST access to a Realtime Database, authenticated per call with the user's
/// id token.
#[derive(Clone)]
pub struct RealtimeDb {
    http: HttpClient,
    base_url: String,
}

impl RealtimeDb {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        id_token: &str
    ) -> Result<Option<T>, StoreError> {
        let resp = self.http
            .get(self.url(path))
            .query(&[("auth", id_token)])
            .send().await?;
        let body = checked_body(resp).await?;
        Ok(serde_json::from_str::<Option<T>>(&body)?)
    }

    /// Reads a location together with its ETag for a later conditional write.
    pub async fn get_with_etag<T: DeserializeOwned>(
        &self,
        path: &str,
        id_token: &str
    ) -> Result<(Option<T>, String), StoreError> {
        let resp = self.http
            .get(self.url(path))
            .query(&[("auth", id_token)])
            .header("X-Firebase-ETag", "true")
            .send().await?;
        let etag = resp.headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| StoreError::Unavailable("Realtime Database returned no ETag".to_string()))?;
        let body = checked_body(resp).await?;
        Ok((serde_json::from_str::<Option<T>>(&body)?, etag))
    }

    pub async fn put_if_match<T: Serialize + ?Sized>(
        &self,
        path: &str,
        id_token: &str,
        value: &T,
        etag: &str
    ) -> Result<PutOutcome, StoreError> {
        let resp = self.http
            .put(self.url(path))
            .query(&[("auth", id_token), ("print", "silent")])
            .header(IF_MATCH, etag)
            .json(value)
            .send().await?;
        if resp.status() == StatusCode::PRECONDITION_FAILED {
            return Ok(PutOutcome::PreconditionFailed);
        }
        checked_body(resp).await?;
        Ok(PutOutcome::Written)
    }

    /// Merges the given children into a location without touching siblings.
    pub async fn patch<T: Serialize + ?Sized>(
        &self,
        path: &str,
        id_token: &str,
        value: &T
    ) -> Result<(), StoreError> {
        let resp = self.http
            .patch(self.url(path))
            .query(&[("auth", id_token), ("print", "silent")])
            .json(value)
            .send().await?;
        checked_body(resp).await?;
        Ok(())
    }

    /// Opens a streaming GET. The first `put` event carries the current value.
    pub async fn stream(&self, path: &str, id_token: &str) -> Result<EventStream, StoreError> {
        let resp = self.http
            .get(self.url(path))
            .query(&[("auth", id_token)])
            .header(ACCEPT, "text/event-stream")
            .send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status { status: status.as_u16(), body });
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut parser = SseParser::default();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(buf) => {
                        for frame in parser.feed(&buf) {
                            match frame.into_event() {
                                Ok(Some(event)) => {
                                    if tx.send(Ok(event)).await.is_err() {
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    warn!("Dropping malformed database event: {}", e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(StoreError::Http(e))).await;
                        return;
                    }
                }
            }
            debug!("Database event stream closed by server");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn checked_body(resp: reqwest::Response) -> Result<String, StoreError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(StoreError::Status { status: status.as_u16(), body });
    }
    Ok(body)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    fn into_event(self) -> Result<Option<DbEvent>, serde_json::Error> {
        let event = match self.event.as_str() {
            "put" => {
                let payload: EventPayload = serde_json::from_str(&self.data)?;
                DbEvent::Put { path: payload.path, data: payload.data }
            }
            "patch" => {
                let payload: EventPayload = serde_json::from_str(&self.data)?;
                DbEvent::Patch { path: payload.path, data: payload.data }
            }
            "keep-alive" => DbEvent::KeepAlive,
            "cancel" => DbEvent::Cancel,
            "auth_revoked" => DbEvent::AuthRevoked,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Incremental `text/event-stream` decoder. Bytes may arrive split anywhere,
/// including inside a UTF-8 sequence, so lines are cut from a byte buffer.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: String,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.event.is_empty() || !self.data.is_empty() {
                    frames.push(SseFrame {
                        event: std::mem::take(&mut self.event),
                        data: std::mem::take(&mut self.data).join("\n"),
                    });
                }
                continue;
            }
            if let Some(value) = line.strip_prefix("event:") {
                self.event = value.trim_start().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.trim_start().to_string());
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_frames_split_across_chunks() {
        let mut parser = SseParser::default();
        let first = parser.feed(b"event: put\ndata: {\"path\":\"/\",");
        assert!(first.is_empty());
        let frames = parser.feed(b"\"data\":{\"revision\":2}}\n\nevent: keep-alive\ndata: null\n\n");
        assert_eq!(frames.len(), 2);

        let put = frames[0].clone_event();
        assert_eq!(put, DbEvent::Put { path: "/".to_string(), data: json!({"revision": 2}) });
        assert_eq!(frames[1].clone_event(), DbEvent::KeepAlive);
    }

    #[test]
    fn handles_crlf_and_multibyte_split() {
        let mut parser = SseParser::default();
        let text = "event: put\r\ndata: {\"path\":\"/x\",\"data\":\"کھیرا\"}\r\n\r\n".as_bytes();
        let (a, b) = text.split_at(40);
        assert!(parser.feed(a).is_empty());
        let frames = parser.feed(b);
        assert_eq!(
            frames[0].clone_event(),
            DbEvent::Put { path: "/x".to_string(), data: json!("کھیرا") }
        );
    }

    #[test]
    fn unknown_events_are_skipped() {
        let frame = SseFrame { event: "ping".to_string(), data: String::new() };
        assert_eq!(frame.into_event().unwrap(), None);
    }

    impl SseFrame {
        fn clone_event(&self) -> DbEvent {
            SseFrame { event: self.event.clone(), data: self.data.clone() }
                .into_event()
                .unwrap()
                .unwrap()
        }
    }
}
