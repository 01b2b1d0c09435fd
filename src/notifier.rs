//! Notifier half: forwards one query to the instance that owns the
//! endpoint.

use std::time::Duration;

use async_io::Timer;
use async_net::unix::UnixStream;
use futures_lite::future;
use futures_lite::io::AsyncWriteExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec;
use crate::endpoint::Endpoint;

/// How long [`Notifier::send_query`] waits for the connection to be
/// established before giving up.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Connects to the well-known endpoint on demand and delivers one query
/// per call, without needing to know which process owns it.
pub struct Notifier {
    endpoint: Endpoint,
    connect_timeout: Duration,
}

impl Notifier {
    /// Create a notifier for the given endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout. Mostly useful in tests.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Send `query` to whatever process currently owns the endpoint.
    ///
    /// The message is written and flushed before the connection is
    /// released; the receiving side is never waited on. Returns `false`
    /// when no connection could be established within the timeout (the
    /// normal, non-fatal signal that no other instance is running) or
    /// when the write failed. No retries are attempted; retrying is the
    /// caller's decision.
    pub async fn send_query<Q: Serialize>(&self, query: &Q, prevent_activation: bool) -> bool {
        let buf = match codec::encode(query, prevent_activation) {
            Ok(buf) => buf,
            Err(e) => {
                warn!(error = %e, "failed to encode query");
                return false;
            }
        };

        // Connecting, with a bounded wait.
        let connect = async {
            match UnixStream::connect(self.endpoint.path()).await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    debug!(error = %e, "could not reach a running instance");
                    None
                }
            }
        };
        let give_up = async {
            Timer::after(self.connect_timeout).await;
            None
        };
        let Some(mut stream) = future::or(connect, give_up).await else {
            return false;
        };

        // Writing, then flushing: without the flush a short write can be
        // lost when the connection is torn down right afterwards.
        if let Err(e) = stream.write_all(&buf).await {
            warn!(error = %e, "failed to write query");
            return false;
        }
        if let Err(e) = stream.flush().await {
            warn!(error = %e, "failed to flush query");
            return false;
        }

        // Releasing: drop without waiting for the receiver to close.
        drop(stream);
        true
    }
}
