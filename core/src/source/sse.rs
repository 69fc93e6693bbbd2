/// Live notices over server-sent events
///
/// `GET {stream_base}/topic/notices/{batch}/{department}` answers with
/// `text/event-stream`; every event's `data:` carries one notice as JSON.
use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::feed::{decode_notice, NoticePayload, TopicKey};
use crate::source::rest::{http_client, HttpClient};
use crate::source::{ItemCallback, LiveStream, SubscriptionHandle};
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use http::Request;
use http_body_util::{BodyExt, Empty};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// Longest line accepted before the stream is treated as broken
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental parser for the event-stream format
#[derive(Debug)]
pub struct SseParser {
    pending: Vec<u8>,
    data: Vec<String>,
    max_line: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            data: Vec::new(),
            max_line,
        }
    }

    /// Consume a chunk and return the data of every event it completed.
    /// Chunks may split lines anywhere, including inside UTF-8 sequences.
    ///
    /// Fails once an unterminated line grows past the line limit; the
    /// buffered bytes are dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches(&['\r', '\n'][..]);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                // comment / keepalive
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }

        if self.pending.len() > self.max_line {
            let len = self.pending.len();
            self.pending.clear();
            self.data.clear();
            return Err(FeedError::StreamConnection(format!(
                "event line exceeds {} bytes ({} buffered)",
                self.max_line, len
            )));
        }
        Ok(events)
    }
}

/// Notice stream over SSE, one reader task per subscription
pub struct SseStream {
    base: String,
    auth_token: Option<String>,
    connect_timeout: Duration,
    client: HttpClient,
    connected: Arc<AtomicBool>,
    readers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl SseStream {
    pub fn new(config: &Config) -> Self {
        Self {
            base: config.stream_base().to_string(),
            auth_token: config.auth_token.clone(),
            connect_timeout: config.request_timeout,
            client: http_client(),
            connected: Arc::new(AtomicBool::new(false)),
            readers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_base(base: impl Into<String>) -> Self {
        let config = Config {
            api_base: base.into(),
            ..Default::default()
        };
        Self::new(&config)
    }

    pub fn topic_url(&self, topic: &TopicKey) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), topic.url_path())
    }
}

impl LiveStream<NoticePayload> for SseStream {
    async fn subscribe(
        &self,
        topic: &TopicKey,
        on_item: ItemCallback<NoticePayload>,
    ) -> Result<SubscriptionHandle> {
        let url = self.topic_url(topic);
        let uri: hyper::Uri = url
            .parse()
            .map_err(|e| FeedError::Config(format!("invalid stream URL {}: {}", url, e)))?;

        let mut builder = Request::get(uri)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.auth_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| FeedError::StreamConnection(e.to_string()))?;

        let response = timeout(self.connect_timeout, self.client.request(req))
            .await
            .map_err(|_| FeedError::StreamConnection(format!("connecting to {} timed out", url)))?
            .map_err(|e| FeedError::StreamConnection(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(FeedError::StreamConnection(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }

        info!("Event stream open: {}", url);
        self.connected.store(true, Ordering::SeqCst);

        let handle = SubscriptionHandle::new(topic.clone());
        let connected = self.connected.clone();
        let topic = topic.clone();
        let mut body = response.into_body();

        let reader = tokio::spawn(async move {
            let mut parser = SseParser::new();
            loop {
                match body.frame().await {
                    Some(Ok(frame)) => {
                        let Ok(data) = frame.into_data() else {
                            continue;
                        };
                        let events = match parser.feed(&data) {
                            Ok(events) => events,
                            Err(e) => {
                                warn!("Event stream for {} dropped: {}", topic, e);
                                break;
                            }
                        };
                        for event in events {
                            match decode_notice(&event) {
                                Ok(item) => on_item(item),
                                Err(e) => warn!("Dropping malformed notice on {}: {}", topic, e),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Event stream for {} failed: {}", topic, e);
                        break;
                    }
                    None => {
                        info!("Event stream for {} closed by server", topic);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        self.readers.lock().insert(handle.id, reader);
        Ok(handle)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut readers = self.readers.lock();
        if let Some(reader) = readers.remove(&handle.id) {
            reader.abort();
        }
        if readers.is_empty() {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SseStream {
    fn drop(&mut self) {
        for (_, reader) in self.readers.lock().drain() {
            reader.abort();
        }
    }
}
