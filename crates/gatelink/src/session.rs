//! Session context and the acceptor gluing broker proposals to the host.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use gatelink_core::messages::SessionAnnouncement;
use gatelink_core::{GameProfile, GateError, GateResult};

use crate::channel::{channel_pair, RemoteEnd};
use crate::connection::VirtualConnection;
use crate::handler::LoginDriverFactory;
use crate::pipeline::PacketHandlerRegistry;
use crate::watch::SessionProposal;

/// Everything a virtual connection knows about its session.
///
/// Written exactly once at accept time, then only read; shared as
/// `Arc<SessionContext>` between the channel ends and the pipeline.
#[derive(Debug, Clone)]
pub struct SessionContext {
    session_id: String,
    profile: GameProfile,
    spoofed_address: SocketAddr,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        profile: GameProfile,
        spoofed_address: SocketAddr,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            profile,
            spoofed_address,
        }
    }

    pub(crate) fn from_announcement(announcement: &SessionAnnouncement) -> GateResult<Self> {
        let raw = announcement.client_address.as_deref().ok_or_else(|| {
            GateError::InvalidAddress("session announcement carries no client address".into())
        })?;
        Ok(Self::new(
            announcement.id.clone(),
            announcement.profile.clone(),
            parse_spoofed_address(raw)?,
        ))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn profile(&self) -> &GameProfile {
        &self.profile
    }

    /// The player's real remote address, reported by the virtual connection
    /// in place of any process-local address.
    pub fn spoofed_address(&self) -> SocketAddr {
        self.spoofed_address
    }
}

/// Parse an announced `host:port` address, tolerating an IPv6 `%zone` scope
/// inside the bracketed form.
fn parse_spoofed_address(raw: &str) -> GateResult<SocketAddr> {
    let cleaned = match (raw.find('%'), raw.rfind(']')) {
        (Some(pct), Some(end)) if pct < end => format!("{}{}", &raw[..pct], &raw[end..]),
        _ => raw.to_string(),
    };
    cleaned
        .parse()
        .map_err(|_| GateError::InvalidAddress(format!("unparsable client address: {raw}")))
}

/// The host server's native registration point: receives a virtual
/// connection exactly as it would a socket accept.
pub trait ConnectionRegistrar: Send + Sync {
    fn register(&self, connection: VirtualConnection) -> GateResult<()>;
}

/// Turns accepted proposals into registered virtual connections.
pub struct SessionAcceptor {
    registry: Arc<PacketHandlerRegistry>,
    registrar: Arc<dyn ConnectionRegistrar>,
    drivers: Arc<dyn LoginDriverFactory>,
}

impl SessionAcceptor {
    pub fn new(
        registry: Arc<PacketHandlerRegistry>,
        registrar: Arc<dyn ConnectionRegistrar>,
        drivers: Arc<dyn LoginDriverFactory>,
    ) -> Self {
        Self {
            registry,
            registrar,
            drivers,
        }
    }

    /// Accept a proposal: build its session context, create the channel
    /// pair, register the local end with the host, and return the remote
    /// end for whoever drives relay traffic.
    ///
    /// Accept-by-omission: nothing is sent to the broker here; not
    /// rejecting and building the session *is* the acceptance.
    pub fn accept(&self, proposal: &SessionProposal) -> GateResult<RemoteEnd> {
        let context = proposal.accept()?;
        let driver = self.drivers.create(&context);

        info!(
            session = %context.session_id(),
            player = %context.profile().username,
            address = %context.spoofed_address(),
            "session accepted"
        );

        let (local, remote) = channel_pair(context);
        let connection = VirtualConnection::new(local, self.registry.clone(), driver);
        self.registrar.register(connection)?;
        Ok(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::RecordingDriver;
    use crate::handler::LoginDriver;
    use gatelink_core::ProfileProperty;
    use std::sync::Mutex;

    #[test]
    fn parses_plain_ipv4() {
        let addr = parse_spoofed_address("203.0.113.5:51234").unwrap();
        assert_eq!(addr, "203.0.113.5:51234".parse().unwrap());
    }

    #[test]
    fn parses_bracketed_ipv6_with_zone() {
        let addr = parse_spoofed_address("[fe80::1%eth0]:25565").unwrap();
        assert_eq!(addr, "[fe80::1]:25565".parse().unwrap());
    }

    #[test]
    fn rejects_garbage_address() {
        assert!(matches!(
            parse_spoofed_address("not an address"),
            Err(GateError::InvalidAddress(_))
        ));
    }

    #[test]
    fn context_from_announcement() {
        let announcement = SessionAnnouncement {
            id: "sess-9".into(),
            client_address: Some("198.51.100.7:40000".into()),
            profile: GameProfile::new(
                "alex",
                uuid::Uuid::new_v4(),
                vec![ProfileProperty {
                    name: "textures".into(),
                    value: "v".into(),
                    signature: None,
                }],
            ),
        };
        let context = SessionContext::from_announcement(&announcement).unwrap();
        assert_eq!(context.session_id(), "sess-9");
        assert_eq!(context.profile().username, "alex");
        assert_eq!(
            context.spoofed_address(),
            "198.51.100.7:40000".parse().unwrap()
        );
    }

    #[test]
    fn announcement_without_address_is_rejected() {
        let announcement = SessionAnnouncement {
            id: "sess-9".into(),
            client_address: None,
            profile: GameProfile::new("alex", uuid::Uuid::new_v4(), vec![]),
        };
        assert!(matches!(
            SessionContext::from_announcement(&announcement),
            Err(GateError::InvalidAddress(_))
        ));
    }

    struct CollectingRegistrar {
        addresses: Mutex<Vec<SocketAddr>>,
    }

    impl ConnectionRegistrar for CollectingRegistrar {
        fn register(&self, connection: VirtualConnection) -> GateResult<()> {
            self.addresses
                .lock()
                .unwrap()
                .push(connection.remote_address());
            Ok(())
        }
    }

    struct RecordingFactory;

    impl LoginDriverFactory for RecordingFactory {
        fn create(&self, _context: &SessionContext) -> Arc<dyn LoginDriver> {
            Arc::new(RecordingDriver::default())
        }
    }

    #[tokio::test]
    async fn accept_registers_connection_with_spoofed_address() {
        let registrar = Arc::new(CollectingRegistrar {
            addresses: Mutex::new(Vec::new()),
        });
        let acceptor = SessionAcceptor::new(
            PacketHandlerRegistry::builder().build(),
            registrar.clone(),
            Arc::new(RecordingFactory),
        );

        let proposal = SessionProposal::detached(SessionAnnouncement {
            id: "sess-2".into(),
            client_address: Some("203.0.113.9:1234".into()),
            profile: GameProfile::new("steve", uuid::Uuid::new_v4(), vec![]),
        });

        let remote = acceptor.accept(&proposal).unwrap();
        assert_eq!(remote.context().session_id(), "sess-2");
        assert_eq!(
            *registrar.addresses.lock().unwrap(),
            vec!["203.0.113.9:1234".parse::<SocketAddr>().unwrap()]
        );

        // decision finality: a late reject loses the race
        assert!(matches!(
            proposal.reject(Some("too late")).await,
            Err(GateError::AlreadyDecided)
        ));
    }
}
