//! gatelink: accept players through a remote session broker.
//!
//! A gatelink endpoint never exposes its own socket to players. Instead it
//! keeps one watch stream open to the session broker; every announced player
//! becomes, after local acceptance, an in-process virtual connection that
//! the host server consumes exactly like a socket accept: it reports the
//! player's real remote address and carrying their identity, injected into
//! the first handshake packet via the legacy NUL-delimited forwarding
//! layout.
//!
//! The pieces, in data-flow order:
//! - [`watch`]: the broker subscription, decoding announcements into
//!   [`watch::SessionProposal`]s.
//! - [`session`]: the accept path, from proposal to
//!   [`session::SessionContext`] to registered connection.
//! - [`channel`]: the virtual channel fabric.
//! - [`pipeline`] + [`handler`]: the per-connection transform chain that
//!   rewrites the handshake, suppresses the duplicate login, and detaches.

pub mod channel;
pub mod config;
pub mod connection;
pub mod handler;
pub mod pipeline;
pub mod session;
pub mod token;
pub mod watch;

pub use channel::{channel_pair, LocalEnd, RemoteEnd};
pub use config::GateConfig;
pub use connection::VirtualConnection;
pub use handler::{register_session_handler, HandshakeState, LoginDriver, LoginDriverFactory};
pub use pipeline::{
    ConnectionContext, ConnectionPipeline, Direction, HandlerId, PacketHandlerRegistry,
    RegistryBuilder, Verdict,
};
pub use session::{ConnectionRegistrar, SessionAcceptor, SessionContext};
pub use watch::{SessionProposal, WatchClient, WatchEvent, WatchHandle};
