//! Persistent broker credential.
//!
//! Every watch request authenticates with a bearer token generated on first
//! use and stored as `token.json` in the data directory, so an endpoint
//! keeps its identity across restarts.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use gatelink_core::GateResult;

const TOKEN_FILE: &str = "token.json";
const TOKEN_RANDOM_LEN: usize = 20;

#[derive(Serialize, Deserialize)]
struct TokenFile {
    token: String,
}

/// Load the stored token, generating and persisting a fresh one if absent.
pub fn load_or_generate(data_dir: &Path) -> GateResult<String> {
    let path = data_dir.join(TOKEN_FILE);
    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let file: TokenFile = serde_json::from_str(&content)
            .map_err(|e| gatelink_core::GateError::Other(format!("token file corrupt: {e}")))?;
        return Ok(file.token);
    }

    let token = generate();
    std::fs::create_dir_all(data_dir)?;
    let content = serde_json::to_string(&TokenFile {
        token: token.clone(),
    })
    .map_err(|e| gatelink_core::GateError::Other(format!("token serialization failed: {e}")))?;
    std::fs::write(&path, content)?;
    info!(path = %path.display(), "generated new endpoint token");
    Ok(token)
}

/// Generate a fresh token: `T-` + random alphanumeric tail.
fn generate() -> String {
    let tail: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("T-{tail}")
}
