//! Legacy forwarding codec for the handshake address field.
//!
//! Identity is smuggled through the handshake's address-like field as a
//! NUL-delimited string, for consumers that expect the legacy layout:
//!
//! `host NUL ip NUL undashed-uuid NUL json-properties-array`
//!
//! The IP segment never carries an IPv6 `%zone` suffix, and an empty
//! property list is serialized as `[]`, never omitted.

use uuid::Uuid;

use crate::error::{GateError, GateResult};
use crate::profile::ProfileProperty;

/// The four fields recovered from a forwarding address string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedIdentity {
    pub host: String,
    pub ip: String,
    pub id: Uuid,
    pub properties: Vec<ProfileProperty>,
}

/// Build the forwarding address string for one connection.
///
/// `host` is the original address field value, `ip` the apparent remote
/// IP-address string (any `%zone` suffix is stripped here).
pub fn encode(
    host: &str,
    ip: &str,
    id: &Uuid,
    properties: &[ProfileProperty],
) -> GateResult<String> {
    let properties = serde_json::to_string(properties)
        .map_err(|e| GateError::Codec(format!("property serialization failed: {e}")))?;
    Ok(format!(
        "{host}\0{ip}\0{id}\0{properties}",
        ip = strip_zone(ip),
        id = id.simple(),
    ))
}

/// Parse a forwarding address string back into its four fields.
pub fn decode(data: &str) -> GateResult<ForwardedIdentity> {
    let mut segments = data.splitn(4, '\0');
    let (Some(host), Some(ip), Some(id), Some(properties)) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(GateError::Codec(
            "forwarding address has fewer than four segments".into(),
        ));
    };

    let id = Uuid::parse_str(id)
        .map_err(|e| GateError::Codec(format!("invalid forwarded player id: {e}")))?;
    let properties: Vec<ProfileProperty> = serde_json::from_str(properties)
        .map_err(|e| GateError::Codec(format!("invalid forwarded properties: {e}")))?;

    Ok(ForwardedIdentity {
        host: host.to_string(),
        ip: ip.to_string(),
        id,
        properties,
    })
}

/// Strip a trailing `%zone` scope from an IPv6 address string.
fn strip_zone(ip: &str) -> &str {
    match ip.find('%') {
        Some(idx) => &ip[..idx],
        None => ip,
    }
}
