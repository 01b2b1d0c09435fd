//! Listener half: owns the well-known endpoint for the process lifetime and
//! surfaces every received query as an event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_io::Timer;
use async_net::unix::{UnixListener, UnixStream};
use futures_lite::future;
use futures_lite::io::AsyncReadExt;
use serde::de::DeserializeOwned;
use smol::Task;
use smol::channel::{self, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::codec::{self, DecodeError};
use crate::endpoint::Endpoint;
use crate::error::{HandoffError, HandoffResult};

/// Default for how long an accepted connection may take to deliver a full
/// message before it is dropped. A connected-but-silent client must not
/// hold a connection slot forever.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A query received from another instance of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent<Q> {
    /// The decoded search query.
    pub query: Q,
    /// Whether the receiving instance should avoid bringing its window to
    /// the foreground after processing the query.
    pub prevent_activation: bool,
}

/// Listens on the well-known endpoint and emits one [`QueryEvent`] per
/// connection that delivers a fully decoded message.
///
/// Events arrive in read-completion order, which may differ from accept
/// order when reads interleave. Each connection produces at most one event.
pub struct Listener<Q> {
    endpoint: Endpoint,
    read_timeout: Duration,
    events_tx: Sender<QueryEvent<Q>>,
    events_rx: Receiver<QueryEvent<Q>>,
    last_error: Arc<Mutex<String>>,
    armed: Arc<AtomicBool>,
    accept_task: Mutex<Option<Task<()>>>,
}

impl<Q: DeserializeOwned + Send + 'static> Listener<Q> {
    /// Create a listener for the given endpoint. No resources are acquired
    /// until [`start`](Self::start).
    pub fn new(endpoint: Endpoint) -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        Self {
            endpoint,
            read_timeout: READ_TIMEOUT,
            events_tx,
            events_rx,
            last_error: Arc::new(Mutex::new(String::new())),
            armed: Arc::new(AtomicBool::new(false)),
            accept_task: Mutex::new(None),
        }
    }

    /// Override the per-connection read deadline. Mostly useful in tests.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Bind the endpoint and begin accepting connections in the background.
    ///
    /// With `force`, a socket file left behind by an uncleanly terminated
    /// listener is removed first; if that cleanup fails, `start` fails with
    /// [`HandoffError::StaleEndpointRemovalFailed`] without attempting to
    /// bind. A live endpoint is never stolen, forced or not.
    ///
    /// A bind conflict, most commonly another running instance owning the
    /// endpoint, is reported as [`HandoffError::BindFailed`] with no side
    /// effects; the caller's standard recovery is to switch to the
    /// [`Notifier`](crate::Notifier) role.
    ///
    /// Call exactly once; the listener stays armed until it is dropped.
    pub fn start(&self, force: bool) -> HandoffResult<()> {
        if force {
            if let Err(e) = self.endpoint.remove_stale() {
                self.set_last_error(e.to_string());
                return Err(e);
            }
        }

        let listener = match UnixListener::bind(self.endpoint.path()) {
            Ok(listener) => listener,
            Err(e) => {
                self.set_last_error(e.to_string());
                return Err(HandoffError::BindFailed {
                    path: self.endpoint.path().to_path_buf(),
                    source: e,
                });
            }
        };

        info!(path = %self.endpoint.path().display(), "listener armed");
        self.armed.store(true, Ordering::SeqCst);

        let events = self.events_tx.clone();
        let last_error = Arc::clone(&self.last_error);
        let armed = Arc::clone(&self.armed);
        let task = smol::spawn(accept_loop(
            listener,
            events,
            last_error,
            armed,
            self.read_timeout,
        ));
        // Held rather than detached so that dropping the listener cancels
        // the loop and releases the listening socket.
        *self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        Ok(())
    }

    /// Stream of received queries.
    ///
    /// The receiver can be cloned; each event is delivered to exactly one
    /// receiver. Delivery never blocks the accept loop.
    pub fn queries(&self) -> Receiver<QueryEvent<Q>> {
        self.events_rx.clone()
    }

    /// Human-readable description of the most recent error on the channel,
    /// or an empty string if none has occurred. Safe to call at any time.
    pub fn error_string(&self) -> String {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, message: String) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = message;
    }
}

impl<Q> Drop for Listener<Q> {
    fn drop(&mut self) {
        // Cancelling the accept task closes the listening socket.
        drop(
            self.accept_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = std::fs::remove_file(self.endpoint.path());
            debug!(path = %self.endpoint.path().display(), "listener released");
        }
    }
}

/// Accept loop: runs in the background for as long as the listener is
/// armed; cancelled when the listener is dropped.
async fn accept_loop<Q: DeserializeOwned + Send + 'static>(
    listener: UnixListener,
    events: Sender<QueryEvent<Q>>,
    last_error: Arc<Mutex<String>>,
    armed: Arc<AtomicBool>,
    read_timeout: Duration,
) {
    while armed.load(Ordering::SeqCst) {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let events = events.clone();
                smol::spawn(handle_connection(stream, events, read_timeout)).detach();
            }
            Err(e) => {
                if armed.load(Ordering::SeqCst) {
                    warn!(error = %e, "failed to accept connection");
                    *last_error.lock().unwrap_or_else(PoisonError::into_inner) = e.to_string();
                }
            }
        }
    }
}

/// Read and decode one message from an accepted connection.
///
/// Bytes accumulate in a per-connection buffer until they decode to a full
/// message, the peer stops sending, or the read deadline passes. At most
/// one event is emitted per connection, and the connection is closed as
/// soon as the message has been read; the sender is never waited on.
async fn handle_connection<Q: DeserializeOwned + Send + 'static>(
    mut stream: UnixStream,
    events: Sender<QueryEvent<Q>>,
    read_timeout: Duration,
) {
    let mut deadline = Timer::after(read_timeout);
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let event = loop {
        let read = future::or(
            async { Some(stream.read(&mut chunk).await) },
            async {
                (&mut deadline).await;
                None
            },
        )
        .await;

        let n = match read {
            Some(Ok(0)) => {
                debug!("connection closed before a full message");
                return;
            }
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                debug!(error = %e, "failed to read from connection");
                return;
            }
            None => {
                debug!("connection idle past read deadline");
                return;
            }
        };

        buf.extend_from_slice(&chunk[..n]);
        match codec::decode::<Q>(&buf) {
            Ok((query, prevent_activation)) => {
                break QueryEvent {
                    query,
                    prevent_activation,
                };
            }
            Err(DecodeError::Incomplete) => continue,
            Err(DecodeError::Malformed(reason)) => {
                warn!(%reason, "dropping malformed message");
                return;
            }
        }
    };

    // Close before emitting; the receiver does not wait for the sender.
    drop(stream);

    // Unbounded channel, so this never blocks the accept path. It only
    // fails once the application has dropped every receiver, and then the
    // query has nowhere to go anyway.
    if events.try_send(event).is_err() {
        debug!("no receiver for query event");
    }
}
