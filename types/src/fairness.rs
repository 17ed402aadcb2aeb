use serde::{Deserialize, Serialize};

/// Seeds disclosed after a round crashes.
///
/// `commitment` is the hex `sha256(server_seed)` that was published while the
/// round was waiting. Anyone holding the reveal can check the commitment and
/// recompute the crash point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairnessReveal {
    pub server_seed: String,
    pub client_seed: String,
    pub commitment: String,
}
