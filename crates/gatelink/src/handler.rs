//! The per-connection handshake/login stage.
//!
//! One logical handler, registered for the handshake and login-start kinds,
//! walks each virtual connection through a small state machine: rewrite the
//! handshake address with the forwarded identity, then either kick or
//! suppress the duplicate login-start and replay the host's login sequence,
//! then detach.

use std::sync::Arc;

use tracing::debug;

use gatelink_core::packet::{Packet, PacketKind};
use gatelink_core::{forwarding, GameProfile, GateResult};

use crate::pipeline::{ConnectionContext, Direction, HandlerId, RegistryBuilder};
use crate::session::SessionContext;

/// Host capability for driving a login without a real login-start packet.
///
/// Implemented once per host platform; the pipeline only ever calls this
/// interface.
pub trait LoginDriver: Send + Sync {
    /// Seed the host's login machinery with the player identity.
    fn init_identity(&self, profile: &GameProfile) -> GateResult<()>;

    /// Replay the host's login event sequence as if a login-start arrived.
    fn fire_login_sequence(&self) -> GateResult<()>;

    /// Disconnect the player with a host-styled message.
    fn disconnect(&self, message: &str) -> GateResult<()>;
}

/// Creates one [`LoginDriver`] per accepted session.
pub trait LoginDriverFactory: Send + Sync {
    fn create(&self, context: &SessionContext) -> Arc<dyn LoginDriver>;
}

/// Where a connection stands in the handshake/login exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    HandshakeSent,
    LoginComplete,
    Kicked,
}

/// Register the session stage with the process-wide registry.
pub fn register_session_handler(builder: &mut RegistryBuilder) -> HandlerId {
    builder.register(
        &[PacketKind::Handshake, PacketKind::LoginStart],
        Direction::ToServer,
        handle,
    )
}

fn handle(ctx: &mut ConnectionContext, packet: Packet, _to_server: bool) -> GateResult<Packet> {
    match packet {
        Packet::Handshake(mut handshake) if ctx.state() == HandshakeState::Start => {
            let session = ctx.session().clone();
            let profile = session.profile();
            let ip = session.spoofed_address().ip().to_string();
            handshake.server_address = forwarding::encode(
                &handshake.server_address,
                &ip,
                &profile.id,
                &profile.properties,
            )?;
            ctx.set_state(HandshakeState::HandshakeSent);
            debug!(player = %profile.username, "handshake rewritten with forwarded identity");
            Ok(Packet::Handshake(handshake))
        }

        Packet::LoginStart(login) if ctx.state() == HandshakeState::HandshakeSent => {
            // a pending kick always beats continued forwarding
            if let Some(message) = ctx.take_kick_message() {
                ctx.set_state(HandshakeState::Kicked);
                ctx.deliver_kick(message);
                return Ok(Packet::LoginStart(login));
            }

            // the broker already authenticated the player; swallow the
            // duplicate login-start and drive the host's login ourselves
            let session = ctx.session().clone();
            let driver = ctx.login_driver();
            driver.init_identity(session.profile())?;
            driver.fire_login_sequence()?;
            ctx.set_state(HandshakeState::LoginComplete);
            ctx.suppress();
            ctx.remove_self();
            debug!(player = %session.profile().username, "synthetic login fired, stage detached");
            Ok(Packet::LoginStart(login))
        }

        other => Ok(other),
    }
}
