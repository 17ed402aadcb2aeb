use serde::{Deserialize, Serialize};

use crate::FairnessReveal;

/// Immutable outcome of one completed round, keyed by `round_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub round_id: String,
    /// Final multiplier, two decimal places.
    pub crashed_at: f64,
    /// Epoch milliseconds.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reveal: Option<FairnessReveal>,
}
