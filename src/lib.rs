//! Topical: a client session that multiplexes topic subscriptions and calls
//! over one persistent WebSocket connection.
//!
//! Each subscribed topic keeps a locally cached value in sync with the
//! server: a full reset establishes the baseline, then ordered patch batches
//! edit it with structural sharing. Lost connections are re-established and
//! every topic is transparently subscribed again.
//!
//! # Modules
//!
//! - [`session`] - connection lifecycle, subscriptions, calls
//! - [`topic`] - topic identities and readiness checks
//! - [`updates`] - the patch engine
//! - [`value`] - the shared-structure value type
//! - [`protocol`] - wire frame encoding and decoding
//! - [`transport`] - transport traits and the WebSocket implementation
//! - [`reconnect`] - reconnect policies
//! - [`config`] - configuration file and environment overrides
//!
//! # Example
//!
//! ```no_run
//! use topical::{Config, Session, Value};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let session = Session::from_config(&Config::load()?);
//! let subscription = session.subscribe(["lists", "foo"], |value: &Value| {
//!     println!("{value}");
//! })?;
//! session.run().await;
//! subscription.unsubscribe();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod topic;
pub mod transport;
pub mod updates;
pub mod value;

pub use config::Config;
pub use protocol::{ChannelId, ProtocolError};
pub use reconnect::{FixedDelay, NoReconnect, ReconnectPolicy};
pub use session::{
    CallError, ConnectionState, Listener, PendingCall, Session, SessionBuilder, SessionError,
    StateListenerId, Subscription,
};
pub use topic::{Topic, TopicKey, TopicSpec};
pub use transport::{Transport, TransportEvent, TransportEvents, TransportFactory, WebSocketFactory};
pub use updates::{apply_updates, PathKey, Update, UpdateError};
pub use value::{Map, Value};
