//! Player identity value types.
//!
//! A `GameProfile` is built once from broker data and never mutated; every
//! component that needs the identity shares it by clone or `Arc`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A player's identity as announced by the session broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProfile {
    /// In-game username.
    pub username: String,
    /// Stable 128-bit player id.
    pub id: Uuid,
    /// Signed profile properties (skins, capes), order preserved.
    #[serde(default)]
    pub properties: Vec<ProfileProperty>,
}

/// One signed property of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    /// Absent for properties the upstream did not sign.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl GameProfile {
    pub fn new(username: impl Into<String>, id: Uuid, properties: Vec<ProfileProperty>) -> Self {
        Self {
            username: username.into(),
            id,
            properties,
        }
    }

    /// The player id as 32 lowercase hex chars with no separators, the form
    /// the legacy forwarding layout embeds.
    pub fn undashed_id(&self) -> String {
        self.id.simple().to_string()
    }
}
