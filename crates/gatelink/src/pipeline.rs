//! Registry-driven packet transform chain.
//!
//! A process-wide [`PacketHandlerRegistry`] maps packet kinds to ordered
//! transform lists. The registry is built once at startup and frozen behind
//! an `Arc`; every connection reads it without locks. Per-connection state
//! (the handshake state machine, a pending kick, which handlers have
//! detached) lives in the connection's own [`ConnectionPipeline`], never in
//! the registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gatelink_core::packet::{Packet, PacketKind};
use gatelink_core::GateResult;

use crate::handler::{HandshakeState, LoginDriver};
use crate::session::SessionContext;

/// Identifies one registered handler across all the kinds it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u32);

/// Which direction a transform applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
    Both,
}

impl Direction {
    fn matches(self, to_server: bool) -> bool {
        match self {
            Direction::Both => true,
            Direction::ToServer => to_server,
            Direction::ToClient => !to_server,
        }
    }
}

/// A per-packet transform: returns the same packet or a replacement.
pub type PacketTransform =
    Arc<dyn Fn(&mut ConnectionContext, Packet, bool) -> GateResult<Packet> + Send + Sync>;

struct HandlerEntry {
    id: HandlerId,
    direction: Direction,
    transform: PacketTransform,
}

/// Immutable packet-kind → transforms table, shared by all connections.
pub struct PacketHandlerRegistry {
    table: HashMap<PacketKind, Vec<HandlerEntry>>,
}

impl PacketHandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            table: HashMap::new(),
            next_id: 0,
        }
    }

    fn entries(&self, kind: PacketKind) -> Option<&[HandlerEntry]> {
        self.table.get(&kind).map(Vec::as_slice)
    }
}

/// Builds the registry; consumed by `build`, so registration after steady
/// state is impossible by construction.
pub struct RegistryBuilder {
    table: HashMap<PacketKind, Vec<HandlerEntry>>,
    next_id: u32,
}

impl RegistryBuilder {
    /// Register one transform under every given kind; entries run in
    /// registration order per kind.
    pub fn register<F>(&mut self, kinds: &[PacketKind], direction: Direction, transform: F) -> HandlerId
    where
        F: Fn(&mut ConnectionContext, Packet, bool) -> GateResult<Packet> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        let transform: PacketTransform = Arc::new(transform);
        for kind in kinds {
            self.table.entry(*kind).or_default().push(HandlerEntry {
                id,
                direction,
                transform: transform.clone(),
            });
        }
        id
    }

    pub fn build(self) -> Arc<PacketHandlerRegistry> {
        Arc::new(PacketHandlerRegistry { table: self.table })
    }
}

/// What the pipeline decided about one packet.
#[derive(Debug)]
pub enum Verdict {
    /// Packet (possibly replaced) continues downstream.
    Forward(Packet),
    /// Packet is dropped; the connection stays up.
    Suppress,
    /// The player is kicked; nothing further may be forwarded.
    Kick(String),
}

/// Connection-scoped state visible to transforms.
pub struct ConnectionContext {
    session: Arc<SessionContext>,
    login_driver: Arc<dyn LoginDriver>,
    state: HandshakeState,
    kick_message: Option<String>,
    // invocation-scoped effects, drained by the pipeline
    current: Option<HandlerId>,
    removals: Vec<HandlerId>,
    suppress: bool,
    kick: Option<String>,
}

impl ConnectionContext {
    fn new(session: Arc<SessionContext>, login_driver: Arc<dyn LoginDriver>) -> Self {
        Self {
            session,
            login_driver,
            state: HandshakeState::Start,
            kick_message: None,
            current: None,
            removals: Vec::new(),
            suppress: false,
            kick: None,
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn login_driver(&self) -> Arc<dyn LoginDriver> {
        self.login_driver.clone()
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn set_state(&mut self, state: HandshakeState) {
        self.state = state;
    }

    /// Record a kick to be delivered at the next login attempt.
    pub fn set_kick_message(&mut self, message: impl Into<String>) {
        self.kick_message = Some(message.into());
    }

    pub fn kick_message(&self) -> Option<&str> {
        self.kick_message.as_deref()
    }

    pub fn take_kick_message(&mut self) -> Option<String> {
        self.kick_message.take()
    }

    /// Drop the current packet instead of forwarding it.
    pub fn suppress(&mut self) {
        self.suppress = true;
    }

    /// Deliver a kick now; the pipeline stops forwarding for good.
    pub fn deliver_kick(&mut self, message: impl Into<String>) {
        self.kick = Some(message.into());
    }

    /// Detach the running handler from this connection. Takes effect after
    /// the current invocation returns, before the next packet is processed;
    /// safe to call from within the invocation it removes.
    pub fn remove_self(&mut self) {
        if let Some(id) = self.current {
            self.removals.push(id);
        }
    }
}

/// The live transform chain of one connection.
pub struct ConnectionPipeline {
    registry: Arc<PacketHandlerRegistry>,
    removed: HashSet<HandlerId>,
    context: ConnectionContext,
}

impl ConnectionPipeline {
    pub fn new(
        registry: Arc<PacketHandlerRegistry>,
        session: Arc<SessionContext>,
        login_driver: Arc<dyn LoginDriver>,
    ) -> Self {
        Self {
            registry,
            removed: HashSet::new(),
            context: ConnectionContext::new(session, login_driver),
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ConnectionContext {
        &mut self.context
    }

    /// Run one packet through every registered transform for its kind.
    ///
    /// No registry entry means identity pass-through. A transform error is
    /// fatal to this connection only; the caller closes the channel.
    pub fn process(&mut self, mut packet: Packet, to_server: bool) -> GateResult<Verdict> {
        let kind = packet.kind();
        let registry = self.registry.clone();
        let Some(entries) = registry.entries(kind) else {
            return Ok(Verdict::Forward(packet));
        };

        for entry in entries {
            if !entry.direction.matches(to_server) {
                continue;
            }
            if self.removed.contains(&entry.id) {
                continue;
            }

            self.context.current = Some(entry.id);
            let result = (entry.transform)(&mut self.context, packet, to_server);
            self.context.current = None;
            // removal requested during the invocation applies only now
            for id in self.context.removals.drain(..) {
                self.removed.insert(id);
            }

            packet = result?;

            if let Some(message) = self.context.kick.take() {
                return Ok(Verdict::Kick(message));
            }
            if std::mem::take(&mut self.context.suppress) {
                return Ok(Verdict::Suppress);
            }
        }

        Ok(Verdict::Forward(packet))
    }
}
