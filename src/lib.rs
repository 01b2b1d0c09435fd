//! Single-instance coordination over local sockets
//!
//! When a second instance of a desktop application launches, it should hand
//! its startup search query to the instance that is already running and
//! exit, instead of opening a duplicate window. This crate implements the
//! small protocol and connection lifecycle around that handoff:
//!
//! - [`Listener`] owns a well-known local endpoint for the process lifetime
//!   and surfaces every received query as an event.
//! - [`Notifier`] delivers one query to whatever process currently owns the
//!   endpoint, with a bounded connect wait.
//!
//! Both roles share one wire format: the query payload in its own
//! self-delimiting MessagePack encoding, followed by a single flag byte.
//! The query type itself is opaque to this crate; any `serde` type works.
//!
//! # Example
//!
//! ```rust,ignore
//! use handoff::{Endpoint, HandoffError, Listener, Notifier};
//!
//! let endpoint = Endpoint::new("myapp-search");
//! let listener: Listener<SearchQuery> = Listener::new(endpoint.clone());
//!
//! match listener.start(force) {
//!     Ok(()) => {
//!         // Primary instance: consume listener.queries() and activate
//!         // the window for each received query.
//!     }
//!     Err(HandoffError::BindFailed { .. }) => {
//!         // Another instance owns the endpoint: forward and exit.
//!         Notifier::new(endpoint).send_query(&query, false).await;
//!         std::process::exit(0);
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```

mod codec;
mod endpoint;
mod error;
mod listener;
mod notifier;

pub use codec::{DecodeError, decode, encode};
pub use endpoint::Endpoint;
pub use error::{HandoffError, HandoffResult};
pub use listener::{Listener, QueryEvent, READ_TIMEOUT};
pub use notifier::{CONNECT_TIMEOUT, Notifier};

/// Re-export of the channel receiver returned by [`Listener::queries`].
pub use smol::channel::Receiver;
