//! Virtual channel fabric.
//!
//! Materializes a connected pair of in-process endpoints the host server can
//! consume exactly as if a real socket had connected. No operating-system
//! socket or descriptor exists; delivery is plain message passing that
//! preserves write order as read order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use gatelink_core::packet::Packet;
use gatelink_core::{GateError, GateResult};

use crate::session::SessionContext;

struct Shared {
    context: Arc<SessionContext>,
    closed: AtomicBool,
}

struct Endpoint {
    shared: Arc<Shared>,
    tx: Option<mpsc::UnboundedSender<Packet>>,
    rx: mpsc::UnboundedReceiver<Packet>,
}

impl Endpoint {
    fn send(&self, packet: Packet) -> GateResult<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(GateError::ChannelClosed);
        }
        match &self.tx {
            Some(tx) => tx.send(packet).map_err(|_| GateError::ChannelClosed),
            None => Err(GateError::ChannelClosed),
        }
    }

    async fn recv(&mut self) -> Option<Packet> {
        // packets written before the close still drain in order
        self.rx.recv().await
    }

    fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // dropping our sender ends the peer's receive stream
        self.tx = None;
        self.rx.close();
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// The endpoint handed to the server's connection-processing path.
pub struct LocalEnd {
    inner: Endpoint,
}

/// The endpoint kept by whoever bridges relay traffic into the session.
pub struct RemoteEnd {
    inner: Endpoint,
}

/// Create a connected pair of endpoints sharing one session context.
///
/// The context is attached before either end is handed off, so it is
/// queryable before the first packet is read.
pub fn channel_pair(context: SessionContext) -> (LocalEnd, RemoteEnd) {
    let shared = Arc::new(Shared {
        context: Arc::new(context),
        closed: AtomicBool::new(false),
    });
    let (to_remote, from_local) = mpsc::unbounded_channel();
    let (to_local, from_remote) = mpsc::unbounded_channel();

    let local = LocalEnd {
        inner: Endpoint {
            shared: shared.clone(),
            tx: Some(to_remote),
            rx: from_remote,
        },
    };
    let remote = RemoteEnd {
        inner: Endpoint {
            shared,
            tx: Some(to_local),
            rx: from_local,
        },
    };
    (local, remote)
}

impl LocalEnd {
    /// The spoofed remote address downstream code observes: the player's
    /// real address, never this process's own.
    pub fn remote_address(&self) -> SocketAddr {
        self.inner.shared.context.spoofed_address()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.inner.shared.context
    }

    pub fn send(&self, packet: Packet) -> GateResult<()> {
        self.inner.send(packet)
    }

    pub async fn recv(&mut self) -> Option<Packet> {
        self.inner.recv().await
    }

    /// Close both ends. Idempotent.
    pub fn close(&mut self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl RemoteEnd {
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.inner.shared.context
    }

    pub fn send(&self, packet: Packet) -> GateResult<()> {
        self.inner.send(packet)
    }

    pub async fn recv(&mut self) -> Option<Packet> {
        self.inner.recv().await
    }

    /// Close both ends. Idempotent.
    pub fn close(&mut self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatelink_core::packet::RawPacket;
    use gatelink_core::GameProfile;

    fn test_context() -> SessionContext {
        SessionContext::new(
            "sess-1",
            GameProfile::new("steve", uuid::Uuid::new_v4(), vec![]),
            "203.0.113.5:51234".parse().unwrap(),
        )
    }

    fn raw(id: i32) -> Packet {
        Packet::Raw(RawPacket { id, body: vec![] })
    }

    #[tokio::test]
    async fn local_end_reports_spoofed_address() {
        let (local, _remote) = channel_pair(test_context());
        assert_eq!(
            local.remote_address(),
            "203.0.113.5:51234".parse().unwrap()
        );
    }

    #[tokio::test]
    async fn context_is_queryable_before_first_read() {
        let (local, remote) = channel_pair(test_context());
        assert_eq!(local.context().session_id(), "sess-1");
        assert_eq!(remote.context().session_id(), "sess-1");
    }

    #[tokio::test]
    async fn delivery_is_fifo_in_both_directions() {
        let (mut local, mut remote) = channel_pair(test_context());

        for id in 0..10 {
            remote.send(raw(id)).unwrap();
        }
        for id in 0..10 {
            assert_eq!(local.recv().await.unwrap(), raw(id));
        }

        local.send(raw(99)).unwrap();
        assert_eq!(remote.recv().await.unwrap(), raw(99));
    }

    #[tokio::test]
    async fn closing_one_end_closes_the_other() {
        let (mut local, mut remote) = channel_pair(test_context());
        local.close();

        assert!(remote.is_closed());
        assert!(remote.send(raw(1)).is_err());
        assert_eq!(remote.recv().await, None);

        // close is idempotent on either end
        remote.close();
        local.close();
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (mut local, remote) = channel_pair(test_context());
        local.close();
        assert!(matches!(local.send(raw(1)), Err(GateError::ChannelClosed)));
        assert!(matches!(remote.send(raw(1)), Err(GateError::ChannelClosed)));
    }

    #[tokio::test]
    async fn packets_sent_before_close_still_drain() {
        let (mut local, mut remote) = channel_pair(test_context());
        remote.send(raw(1)).unwrap();
        remote.send(raw(2)).unwrap();
        remote.close();

        assert_eq!(local.recv().await.unwrap(), raw(1));
        assert_eq!(local.recv().await.unwrap(), raw(2));
        assert_eq!(local.recv().await, None);
    }
}
