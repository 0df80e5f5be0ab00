//! A virtual connection as the host server sees it.
//!
//! Wraps the local channel end together with its live transform chain, so
//! every packet read from or written to the connection has already been
//! through the pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, warn};

use gatelink_core::packet::Packet;
use gatelink_core::GateResult;

use crate::channel::LocalEnd;
use crate::handler::LoginDriver;
use crate::pipeline::{ConnectionPipeline, PacketHandlerRegistry, Verdict};
use crate::session::SessionContext;

pub struct VirtualConnection {
    channel: LocalEnd,
    pipeline: ConnectionPipeline,
}

impl VirtualConnection {
    pub fn new(
        channel: LocalEnd,
        registry: Arc<PacketHandlerRegistry>,
        login_driver: Arc<dyn LoginDriver>,
    ) -> Self {
        let session = channel.context().clone();
        Self {
            channel,
            pipeline: ConnectionPipeline::new(registry, session, login_driver),
        }
    }

    /// The spoofed remote address, as a real socket would report its peer.
    pub fn remote_address(&self) -> SocketAddr {
        self.channel.remote_address()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        self.channel.context()
    }

    /// Record a kick to be delivered at the connection's next login attempt.
    pub fn set_kick_message(&mut self, message: impl Into<String>) {
        self.pipeline.context_mut().set_kick_message(message);
    }

    /// Next packet travelling toward the server, post-transform.
    ///
    /// Suppressed packets are skipped. A kick verdict disconnects the player
    /// through the login driver and closes the channel; `None` then marks
    /// end-of-stream. A transform error closes the channel and is fatal to
    /// this connection only.
    pub async fn recv(&mut self) -> GateResult<Option<Packet>> {
        loop {
            let Some(packet) = self.channel.recv().await else {
                return Ok(None);
            };
            match self.pipeline.process(packet, true) {
                Ok(Verdict::Forward(packet)) => return Ok(Some(packet)),
                Ok(Verdict::Suppress) => continue,
                Ok(Verdict::Kick(message)) => {
                    debug!(session = %self.context().session_id(), %message, "kicking player");
                    if let Err(err) = self.pipeline.context().login_driver().disconnect(&message) {
                        warn!(error = %err, "login driver disconnect failed");
                    }
                    self.channel.close();
                    return Ok(None);
                }
                Err(err) => {
                    self.channel.close();
                    return Err(err);
                }
            }
        }
    }

    /// Send one packet toward the client, post-transform.
    pub fn send(&mut self, packet: Packet) -> GateResult<()> {
        match self.pipeline.process(packet, false) {
            Ok(Verdict::Forward(packet)) => self.channel.send(packet),
            Ok(Verdict::Suppress) => Ok(()),
            Ok(Verdict::Kick(message)) => {
                if let Err(err) = self.pipeline.context().login_driver().disconnect(&message) {
                    warn!(error = %err, "login driver disconnect failed");
                }
                self.channel.close();
                Ok(())
            }
            Err(err) => {
                self.channel.close();
                Err(err)
            }
        }
    }

    /// Close the connection; the peer end observes end-of-stream.
    pub fn close(&mut self) {
        self.channel.close();
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel_pair;
    use crate::handler::tests::RecordingDriver;
    use crate::handler::register_session_handler;
    use gatelink_core::packet::{Handshake, LoginStart, RawPacket, NEXT_STATE_LOGIN};
    use gatelink_core::{forwarding, GameProfile};

    fn test_setup() -> (VirtualConnection, crate::channel::RemoteEnd, Arc<RecordingDriver>) {
        let mut builder = PacketHandlerRegistry::builder();
        register_session_handler(&mut builder);
        let registry = builder.build();

        let context = SessionContext::new(
            "sess-1",
            GameProfile::new(
                "steve",
                "11111111-1111-1111-1111-111111111111".parse().unwrap(),
                vec![],
            ),
            "203.0.113.5:51234".parse().unwrap(),
        );
        let (local, remote) = channel_pair(context);
        let driver = Arc::new(RecordingDriver::default());
        let connection = VirtualConnection::new(local, registry, driver.clone());
        (connection, remote, driver)
    }

    fn handshake() -> Packet {
        Packet::Handshake(Handshake {
            protocol_version: 763,
            server_address: "play.example.com".into(),
            server_port: 25565,
            next_state: NEXT_STATE_LOGIN,
        })
    }

    fn login_start() -> Packet {
        Packet::LoginStart(LoginStart {
            username: "steve".into(),
            player_id: None,
        })
    }

    #[tokio::test]
    async fn recv_applies_handshake_rewrite() {
        let (mut connection, remote, _driver) = test_setup();
        remote.send(handshake()).unwrap();

        let Some(Packet::Handshake(rewritten)) = connection.recv().await.unwrap() else {
            panic!("expected handshake");
        };
        let identity = forwarding::decode(&rewritten.server_address).unwrap();
        assert_eq!(identity.ip, "203.0.113.5");
    }

    #[tokio::test]
    async fn recv_skips_suppressed_login_start() {
        let (mut connection, remote, driver) = test_setup();
        remote.send(handshake()).unwrap();
        connection.recv().await.unwrap();

        remote.send(login_start()).unwrap();
        let raw = Packet::Raw(RawPacket {
            id: 7,
            body: vec![1, 2],
        });
        remote.send(raw.clone()).unwrap();

        // the suppressed login-start is invisible; the raw packet is next
        assert_eq!(connection.recv().await.unwrap(), Some(raw));
        assert_eq!(driver.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn kick_closes_the_connection() {
        let (mut connection, remote, driver) = test_setup();
        remote.send(handshake()).unwrap();
        connection.recv().await.unwrap();

        connection.set_kick_message("not whitelisted");
        remote.send(login_start()).unwrap();

        assert_eq!(connection.recv().await.unwrap(), None);
        assert!(connection.is_closed());
        assert!(remote.is_closed());
        assert_eq!(
            *driver.calls.lock().unwrap(),
            vec!["disconnect:not whitelisted".to_string()]
        );
    }

    #[tokio::test]
    async fn send_forwards_to_the_remote_end() {
        let (mut connection, mut remote, _driver) = test_setup();
        let raw = Packet::Raw(RawPacket {
            id: 3,
            body: vec![9],
        });
        connection.send(raw.clone()).unwrap();
        assert_eq!(remote.recv().await, Some(raw));
    }

    #[tokio::test]
    async fn remote_address_is_spoofed() {
        let (connection, _remote, _driver) = test_setup();
        assert_eq!(
            connection.remote_address(),
            "203.0.113.5:51234".parse().unwrap()
        );
    }
}
