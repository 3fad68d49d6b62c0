use serde::{Deserialize, Serialize};

/// Value kept in the ephemeral store under `gstate:<state>` while a Google
/// login is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthStateData {
    pub code_verifier: String,
}

impl OAuthStateData {
    pub fn new(code_verifier: String) -> Self {
        Self { code_verifier }
    }
}
