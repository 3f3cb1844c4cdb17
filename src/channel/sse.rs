//! Push transport reading a `text/event-stream` endpoint over HTTP.

use std::{sync::Arc, time::Duration};

use futures::stream::{BoxStream, StreamExt};
use reqwest::{Client, header::ACCEPT};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelEvent, PushCapability},
    dao::snapshot::{FetchError, FetchResult},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const REALTIME_PATH: &str = "api/realtime";

/// Subscribes to `GET {base_url}/api/realtime?topic=<topic>` and reconnects with exponential
/// backoff whenever the stream fails or ends.
#[derive(Clone)]
pub struct SseCapability {
    client: Client,
    base_url: Arc<str>,
    initial_delay: Duration,
    max_delay: Duration,
}

impl SseCapability {
    /// Build a capability with its own HTTP client.
    pub fn connect(base_url: &str) -> FetchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| FetchError::ClientBuilder { source })?;
        Ok(Self::with_client(client, base_url))
    }

    /// Build a capability on top of an existing client.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            initial_delay: INITIAL_DELAY,
            max_delay: MAX_DELAY,
        }
    }

    /// Override the reconnect backoff bounds.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max.max(initial);
        self
    }
}

impl PushCapability for SseCapability {
    fn subscribe(&self, topic: &str) -> BoxStream<'static, ChannelEvent> {
        let client = self.client.clone();
        let url = format!("{}/{}", self.base_url, REALTIME_PATH);
        let topic = topic.to_string();
        let initial_delay = self.initial_delay;
        let max_delay = self.max_delay;

        async_stream::stream! {
            let mut delay = initial_delay;

            loop {
                let request = client
                    .get(&url)
                    .query(&[("topic", topic.as_str())])
                    .header(ACCEPT, "text/event-stream");

                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        // Stream established: reset the backoff.
                        info!(%topic, "push stream connected");
                        delay = initial_delay;
                        yield ChannelEvent::Connected;

                        let mut parser = EventStreamParser::default();
                        let mut body = response.bytes_stream();
                        while let Some(chunk) = body.next().await {
                            match chunk {
                                Ok(bytes) => {
                                    for data in parser.feed(&bytes) {
                                        yield ChannelEvent::Payload(data);
                                    }
                                }
                                Err(err) => {
                                    warn!(%topic, error = %err, "push stream read failed");
                                    break;
                                }
                            }
                        }
                        debug!(%topic, "push stream ended");
                    }
                    Ok(response) => {
                        warn!(%topic, status = %response.status(), "push stream rejected");
                    }
                    Err(err) => {
                        warn!(%topic, error = %err, "push stream connection attempt failed");
                    }
                }

                yield ChannelEvent::Disconnected;
                sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
        .boxed()
    }
}

/// Incremental parser for the `text/event-stream` wire format.
///
/// Only `data` fields matter here; event names, ids and comments are skipped.
#[derive(Debug, Default)]
pub(crate) struct EventStreamParser {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl EventStreamParser {
    /// Feed raw bytes, returning the data of every event completed by this chunk.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
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

        events
    }
}
