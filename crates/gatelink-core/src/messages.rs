//! Broker wire records for the watch stream.
//!
//! The broker sends `WatchResponse` records announcing inbound sessions; the
//! endpoint sends `WatchRequest` records, currently only to reject one.

use serde::{Deserialize, Serialize};

use crate::profile::GameProfile;

/// One inbound record on the watch stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchResponse {
    pub session: SessionAnnouncement,
}

/// A candidate session: a player the relay wants to hand to this endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnnouncement {
    /// Proposal id, referenced by a rejection.
    pub id: String,
    /// The player's apparent remote address as observed by the relay,
    /// `host:port`. This becomes the spoofed address of the virtual
    /// connection.
    pub client_address: Option<String>,
    pub profile: GameProfile,
}

/// One outbound record on the watch stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchRequest {
    pub session_rejection: Option<SessionRejection>,
}

/// Declines a proposed session. Acceptance is implicit; no record is sent
/// for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRejection {
    pub id: String,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::profile::ProfileProperty;

    #[test]
    fn announcement_round_trips_through_cbor() {
        let response = WatchResponse {
            session: SessionAnnouncement {
                id: "sess-1".into(),
                client_address: Some("203.0.113.5:51234".into()),
                profile: GameProfile::new(
                    "steve",
                    uuid::Uuid::new_v4(),
                    vec![ProfileProperty {
                        name: "textures".into(),
                        value: "v".into(),
                        signature: None,
                    }],
                ),
            },
        };
        let bytes = codec::encode(&response).unwrap();
        let decoded: WatchResponse = codec::decode(&bytes).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn rejection_round_trips_through_cbor() {
        let request = WatchRequest {
            session_rejection: Some(SessionRejection {
                id: "sess-1".into(),
                reason: Some("server full".into()),
            }),
        };
        let bytes = codec::encode(&request).unwrap();
        let decoded: WatchRequest = codec::decode(&bytes).unwrap();
        assert_eq!(decoded, request);
    }
}
