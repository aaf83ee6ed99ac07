//! HTTP implementation of [`FilterBackend`].
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Method | Path | Body |
//! |--------|------|------|
//! | GET | `/apps/{context}/filters` | `[Filter]` |
//! | GET | `/apps/{context}/filters/{key}/count` | `{"count": n}` |
//! | GET | `/apps/{context}/notifications` | newline-delimited `NotificationEvent`s |
//! | GET | `/health` | any 2xx |

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::catalog::FilterBackend;
use crate::error::{FetchError, StreamError};
use crate::notifications::NotificationStream;
use crate::types::{Filter, NotificationEvent};

/// Timeout for request/response calls. The notification stream has none.
const REQUEST_TIMEOUT_SECS: u64 = 30;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Longest notification line accepted from the stream, newline excluded.
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Filter backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Creates a backend rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Backend`] if `base_url` is not an absolute
    /// URL, or [`FetchError::Http`] if the client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| FetchError::Backend(format!("invalid backend URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::Backend(format!(
                "backend URL '{base_url}' cannot carry a path"
            )));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Probes `GET /health`.
    ///
    /// # Errors
    ///
    /// Returns the transport error or a [`FetchError::Status`] for non-2xx.
    pub async fn health(&self) -> Result<(), FetchError> {
        let url = self.endpoint(&["health"])?;
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    /// Opens the live notification stream for `context`.
    ///
    /// # Errors
    ///
    /// Fails if the stream cannot be opened. Failures after that arrive as
    /// `Err` items on the stream.
    pub async fn notifications(&self, context: &str) -> Result<NotificationStream, FetchError> {
        let url = self.endpoint(&["apps", context, "notifications"])?;
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/x-ndjson")
            .send()
            .await?;
        let response = check_status(response).await?;
        info!(context, "Notification stream opened");
        Ok(ndjson_events(response.bytes_stream()))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::Backend("backend URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, FetchError> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await?;
        let body = check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl FilterBackend for HttpBackend {
    async fn fetch_filters(&self, context: &str) -> Result<Vec<Filter>, FetchError> {
        let url = self.endpoint(&["apps", context, "filters"])?;
        self.get_json(url).await
    }

    async fn fetch_count(&self, context: &str, filter: &Filter) -> Result<u64, FetchError> {
        let url = self.endpoint(&["apps", context, "filters", &filter.key, "count"])?;
        let body: CountResponse = self.get_json(url).await?;
        Ok(body.count)
    }
}

async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(FetchError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Probes `backend` until `/health` answers or `attempts` run out.
///
/// Returns the number of attempts it took.
///
/// # Errors
///
/// Returns the last probe's error on give-up.
pub async fn wait_until_reachable(
    backend: &HttpBackend,
    attempts: u32,
    delay: Duration,
) -> Result<u32, FetchError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match backend.health().await {
            Ok(()) => {
                info!(attempt, url = %backend.base_url(), "Backend reachable");
                return Ok(attempt);
            }
            Err(err) if attempt >= attempts => {
                warn!(attempts, error = %err, "Backend unreachable, giving up");
                return Err(err);
            }
            Err(err) => {
                debug!(attempt, error = %err, "Backend not reachable yet");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

struct LineReader<S> {
    bytes: Pin<Box<S>>,
    buffer: Vec<u8>,
    max_line: usize,
    /// Discarding the rest of an oversized line up to its newline.
    skipping: bool,
    done: bool,
}

/// Splits a byte stream into lines and decodes each as a notification.
///
/// Blank lines are skipped. A malformed line yields one `Decode` error and
/// reading continues; a transport error ends the stream after being yielded.
/// Lines longer than [`MAX_LINE_BYTES`] are dropped with one `Decode` error
/// without being buffered in full.
fn ndjson_events<S, B, E>(bytes: S) -> NotificationStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<StreamError> + Send + 'static,
{
    ndjson_events_with_limit(bytes, MAX_LINE_BYTES)
}

fn ndjson_events_with_limit<S, B, E>(bytes: S, max_line: usize) -> NotificationStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<StreamError> + Send + 'static,
{
    let reader = LineReader {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        max_line,
        skipping: false,
        done: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(pos) = reader.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = reader.buffer.drain(..=pos).collect();
                if std::mem::take(&mut reader.skipping) {
                    continue;
                }
                if pos > reader.max_line {
                    let err = oversized_line(reader.max_line);
                    return Some((Err(err), reader));
                }
                if let Some(item) = decode_line(&line) {
                    return Some((item, reader));
                }
                continue;
            }

            if reader.buffer.len() > reader.max_line {
                reader.buffer.clear();
                if !reader.skipping {
                    reader.skipping = true;
                    warn!(max_line = reader.max_line, "Dropping oversized notification line");
                    let err = oversized_line(reader.max_line);
                    return Some((Err(err), reader));
                }
            }

            if reader.done {
                if reader.skipping {
                    return None;
                }
                let rest = std::mem::take(&mut reader.buffer);
                return decode_line(&rest).map(|item| (item, reader));
            }

            match reader.bytes.next().await {
                Some(Ok(chunk)) => reader.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => {
                    reader.done = true;
                    reader.buffer.clear();
                    return Some((Err(err.into()), reader));
                }
                None => reader.done = true,
            }
        }
    })
    .boxed()
}

fn oversized_line(max_line: usize) -> StreamError {
    StreamError::Decode(format!("notification line exceeds {max_line} bytes"))
}

fn decode_line(line: &[u8]) -> Option<Result<NotificationEvent, StreamError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_slice(line).map_err(|e| StreamError::Decode(e.to_string())))
}
