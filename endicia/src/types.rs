use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A shipping label issued by the carrier, along with the postage and
/// transaction metadata returned on the same response.
///
/// All scalar fields arrive as strings on the wire and are kept that way;
/// `image` holds the base64-encoded label artwork. The raw request and
/// response bodies are retained for diagnostics, with the base64 image
/// substring elided from `raw_response` so the rest of the body stays
/// readable.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Label {
    /// Base64-encoded label image (`Base64LabelImage` on the wire).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Carrier status code for the request. "0" means success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tracking_number: String,
    /// Postage Indicia Code, the carrier's shipment identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pic: String,
    /// Postage charged for this label, as the carrier's decimal string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub final_postage: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transaction_date_time: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub postmark_date: String,
    /// Account balance remaining after this transaction.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub postage_balance: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cost_center: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reference_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// The request XML that produced this label.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_request: String,
    /// The response body, with the base64 image elided.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_response: String,
}

/// Result of a pass-phrase change or postage purchase.
///
/// `success` is true exactly when the carrier's `Status` field is "0".
/// Carrier-reported failures come back here as values, never as errors.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    /// Carrier status code, verbatim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_response: String,
}

/// Tracking status for a single PIC.
///
/// A status code of "-1" means the carrier does not know the tracking
/// number; that is a reported outcome (`success == false`), not an error.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrackingStatus {
    pub success: bool,
    /// Human-readable status text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_response: String,
}

/// Result of a postage refund request for a single PIC.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RefundStatus {
    pub success: bool,
    /// USPS form number for the refund paperwork.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub form_number: String,
    /// The carrier's per-item approval flag, verbatim ("YES"/"NO").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub is_approved: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_response: String,
}

/// Confirmation for a scheduled carrier pickup.
///
/// Fields the carrier returns beyond the common trio land in `extra`,
/// keyed by the snake_case form of their wire names.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PickupConfirmation {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub day_of_week: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub confirmation_number: String,
    /// Carrier error number, when the pickup could not be scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Remaining response fields (carrier route, ZIP, etc.).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_response: String,
}
