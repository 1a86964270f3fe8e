//! Live event channel.
//!
//! The channel is one persistent POST request whose response body carries an
//! indefinite sequence of newline-delimited JSON records. Two background tasks
//! cooperate per session: a reader that owns the connection and a watchdog
//! that kills it when keep-alives stop arriving. Both feed a single FIFO
//! queue; the consumer-facing [`EventStream`] is the only place a session
//! transitions to a terminal state.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use futures::{ready, FutureExt, Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::client::TractiveClient;
use crate::error::{Error, Result};
use crate::types::ChannelEvent;

/// Control messages that never reach the consumer.
const IGNORED_MESSAGES: &[&str] = &["handshake", "keep-alive"];

/// Unit moved from the background tasks to the consumer.
///
/// At most one terminal item (`Error` or `Cancelled`) is produced per session;
/// after it the session is dead.
enum QueueItem {
    Event(ChannelEvent),
    Error(Error),
    Cancelled(String),
}

/// How the reader task ended.
enum ReaderExit {
    Failed(Error),
    Cancelled,
}

/// Shared liveness state between the reader and the watchdog.
struct Liveness {
    /// Unix millis of the last observed keep-alive, 0 if none yet.
    last_keep_alive: AtomicU64,
    /// Set by the watchdog just before it cancels the reader.
    timed_out: AtomicBool,
}

/// A live event channel bound to a [`TractiveClient`].
///
/// Create one with [`TractiveClient::channel`], then call [`Channel::listen`]
/// to open the session. A channel value itself holds no connection; each
/// `listen` call is an independent session.
#[derive(Debug, Clone)]
pub struct Channel {
    client: TractiveClient,
}

impl Channel {
    pub(crate) fn new(client: TractiveClient) -> Self {
        Self { client }
    }

    /// Open a channel session and return its event stream.
    ///
    /// Events arrive in wire order. The stream ends with at most one `Err`
    /// item: [`Error::Unauthorized`] if the server rejects the connection,
    /// [`Error::Disconnected`] if the watchdog killed a silent connection,
    /// or a generic error for other transport failures. A finished stream
    /// never restarts; call `listen` again for a new session.
    ///
    /// Local read timeouts are transient: the reader silently reconnects.
    pub fn listen(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let liveness = Arc::new(Liveness {
            last_keep_alive: AtomicU64::new(0),
            timed_out: AtomicBool::new(false),
        });

        let reader = tokio::spawn(run_reader(
            self.client.clone(),
            tx,
            cancel.clone(),
            Arc::clone(&liveness),
        ));
        let watchdog = tokio::spawn(run_watchdog(
            cancel.clone(),
            liveness,
            self.client.inner().keep_alive_timeout,
            self.client.inner().check_interval,
        ));

        EventStream {
            rx,
            cancel,
            tasks: vec![reader, watchdog],
            state: StreamState::Active,
        }
    }
}

enum StreamState {
    /// Session live, items flowing.
    Active,
    /// Terminal item seen; joining both tasks before surfacing it.
    Draining {
        join: BoxFuture<'static, ()>,
        error: Option<Error>,
    },
    /// Session finished; the stream only returns `None` now.
    Done,
}

/// Ordered stream of channel events for one session.
///
/// Yields `Ok(event)` items until the session dies, then exactly one `Err`
/// and `None` forever after. Both background tasks are joined before the
/// error is surfaced. Dropping the stream mid-session cancels the tasks.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<QueueItem>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    state: StreamState,
}

impl EventStream {
    /// Cancel the session and wait for both background tasks to finish.
    pub async fn close(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.state = StreamState::Done;
    }

    fn begin_drain(&mut self, error: Option<Error>) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        let join = async move {
            for task in tasks {
                let _ = task.await;
            }
        }
        .boxed();
        self.state = StreamState::Draining { join, error };
    }
}

impl Stream for EventStream {
    type Item = Result<ChannelEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                StreamState::Done => return Poll::Ready(None),
                StreamState::Draining { join, error } => {
                    ready!(join.as_mut().poll(cx));
                    let error = error.take();
                    this.state = StreamState::Done;
                    return Poll::Ready(error.map(Err));
                }
                StreamState::Active => match ready!(this.rx.poll_recv(cx)) {
                    Some(QueueItem::Event(event)) => return Poll::Ready(Some(Ok(event))),
                    Some(QueueItem::Error(error)) => this.begin_drain(Some(error)),
                    Some(QueueItem::Cancelled(cause)) => {
                        this.begin_drain(Some(Error::Disconnected(cause)))
                    }
                    // Reader gone without a terminal item only happens if its
                    // task panicked; end the stream rather than hang.
                    None => this.begin_drain(None),
                },
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        // Best effort: wake the tasks so they exit promptly once detached.
        if !self.tasks.is_empty() {
            self.cancel.cancel();
        }
    }
}

/// Reader task: owns the streaming connection for the whole session.
async fn run_reader(
    client: TractiveClient,
    tx: mpsc::UnboundedSender<QueueItem>,
    cancel: CancellationToken,
    liveness: Arc<Liveness>,
) {
    let item = match reader_loop(&client, &tx, &cancel, &liveness).await {
        ReaderExit::Failed(error) => QueueItem::Error(error),
        ReaderExit::Cancelled => {
            let cause = if liveness.timed_out.load(Ordering::Acquire) {
                "keep-alive timeout".to_string()
            } else {
                "cancelled".to_string()
            };
            QueueItem::Cancelled(cause)
        }
    };
    // Send fails only when the consumer is already gone.
    let _ = tx.send(item);
}

async fn reader_loop(
    client: &TractiveClient,
    tx: &mpsc::UnboundedSender<QueueItem>,
    cancel: &CancellationToken,
    liveness: &Liveness,
) -> ReaderExit {
    let inner = client.inner();
    let read_timeout = inner.read_timeout;

    loop {
        // Headers are recomputed per connection, picking up token refreshes.
        let response = tokio::select! {
            _ = cancel.cancelled() => return ReaderExit::Cancelled,
            opened = tokio::time::timeout(read_timeout, open_channel(client)) => {
                match opened {
                    Err(_) => {
                        tracing::debug!("channel connect timed out, reconnecting");
                        continue;
                    }
                    Ok(Err(error)) if is_transient(&error) => {
                        tracing::debug!(%error, "transient channel failure, reconnecting");
                        continue;
                    }
                    Ok(Err(error)) => return ReaderExit::Failed(error),
                    Ok(Ok(response)) => response,
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return ReaderExit::Failed(Error::from_status(status.as_u16(), message));
        }

        tracing::debug!("channel connected");
        let body = Box::pin(response.bytes_stream().map_err(io::Error::other));
        let mut lines = FramedRead::new(StreamReader::new(body), LinesCodec::new());

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return ReaderExit::Cancelled,
                next = tokio::time::timeout(read_timeout, lines.next()) => next,
            };

            match next {
                // Quiet line: transient, start a fresh connection.
                Err(_) => {
                    tracing::debug!("channel read timed out, reconnecting");
                    break;
                }
                // Server closed the body; long-poll again.
                Ok(None) => break,
                Ok(Some(Err(error))) => {
                    return ReaderExit::Failed(Error::Stream(error.to_string()))
                }
                Ok(Some(Ok(line))) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event: ChannelEvent = match serde_json::from_str(&line) {
                        Ok(event) => event,
                        Err(error) => {
                            tracing::warn!(%error, "undecodable channel record");
                            return ReaderExit::Failed(Error::Json(error));
                        }
                    };

                    if event.message() == Some("keep-alive") {
                        liveness
                            .last_keep_alive
                            .store(unix_now_millis(), Ordering::Release);
                    } else if event
                        .message()
                        .is_some_and(|m| IGNORED_MESSAGES.contains(&m))
                    {
                        // Protocol noise, not forwarded.
                    } else if tx.send(QueueItem::Event(event)).is_err() {
                        // Consumer dropped the stream; nothing left to do.
                        return ReaderExit::Cancelled;
                    }
                }
            }
        }
    }
}

/// Open the streaming POST request with fresh auth headers.
async fn open_channel(client: &TractiveClient) -> Result<reqwest::Response> {
    let inner = client.inner();
    let headers = inner.auth.auth_headers().await?;
    let response = inner
        .http
        .post(inner.channel_url.clone())
        .headers(headers)
        .send()
        .await?;
    Ok(response)
}

/// Connect-level failures worth retrying instead of killing the session.
fn is_transient(error: &Error) -> bool {
    matches!(error, Error::Http(e) if e.is_timeout())
}

/// Watchdog task: cancels the reader when keep-alives stop arriving.
///
/// Never enqueues anything itself; the reader observes the cancellation and
/// produces the terminal item.
async fn run_watchdog(
    cancel: CancellationToken,
    liveness: Arc<Liveness>,
    keep_alive_timeout: Duration,
    check_interval: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(check_interval) => {}
        }

        let last = liveness.last_keep_alive.load(Ordering::Acquire);
        if last == 0 {
            // No keep-alive observed yet; nothing to measure against.
            continue;
        }
        let silence = unix_now_millis().saturating_sub(last);
        if silence > keep_alive_timeout.as_millis() as u64 {
            tracing::warn!(silence_ms = silence, "keep-alive timeout, cancelling channel");
            liveness.timed_out.store(true, Ordering::Release);
            cancel.cancel();
            return;
        }
    }
}

fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_messages_cover_protocol_noise() {
        assert!(IGNORED_MESSAGES.contains(&"handshake"));
        assert!(IGNORED_MESSAGES.contains(&"keep-alive"));
        assert!(!IGNORED_MESSAGES.contains(&"tracker_position"));
    }

    #[test]
    fn transient_detection_rejects_non_http_errors() {
        assert!(!is_transient(&Error::Unauthorized("denied".into())));
        assert!(!is_transient(&Error::Stream("broken pipe".into())));
    }
}
