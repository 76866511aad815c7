//! Wallet state and window capabilities consumed by the broker.
//!
//! The application state store and the popup window machinery are
//! external collaborators; the broker sees them only through these
//! traits. Implementations are expected to be cheap and non-blocking
//! (reads from an in-memory store, a message to the windowing layer).

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::{RequestId, WindowId};

// ============================================================================
// Credential
// ============================================================================

/// An attested identity credential held by the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Credential id, unique in the wallet.
    pub id: String,

    /// KYC level the credential attests (e.g. `"plus+liveness"`).
    pub level: String,

    /// Last known registry verdict.
    pub valid: bool,

    /// Transaction details recorded when the credential was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Value>,
}

impl Credential {
    /// Creates a credential not yet backed by a registry transaction.
    #[must_use]
    pub fn new(id: impl Into<String>, level: impl Into<String>, valid: bool) -> Self {
        Self {
            id: id.into(),
            level: level.into(),
            valid,
            transaction: None,
        }
    }
}

// ============================================================================
// VerificationRequest
// ============================================================================

/// A requester's ask to see credential data, pending user approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Approval-flow correlation id.
    pub id: RequestId,

    /// Origin or name of the asking party.
    pub requester: String,

    /// Credential level the requester needs.
    pub level: String,

    /// Requested fields; `true` marks a field the requester wants.
    pub fields: BTreeMap<String, bool>,
}

impl VerificationRequest {
    /// Creates a request with a fresh id.
    #[must_use]
    pub fn new(
        requester: impl Into<String>,
        level: impl Into<String>,
        fields: BTreeMap<String, bool>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            requester: requester.into(),
            level: level.into(),
            fields,
        }
    }

    /// Checks structural validity: a level must be named and field names
    /// must be non-empty.
    #[must_use]
    pub fn validate(&self) -> bool {
        !self.level.is_empty() && self.fields.keys().all(|field| !field.is_empty())
    }
}

// ============================================================================
// Staking
// ============================================================================

/// Stakeable token, by wire symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenSymbol {
    /// Protocol token.
    #[serde(rename = "FCL")]
    Fcl,
    /// Liquidity-pool token.
    #[serde(rename = "FCL_ETH")]
    FclEth,
}

impl TokenSymbol {
    /// Returns the wire symbol.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fcl => "FCL",
            Self::FclEth => "FCL_ETH",
        }
    }
}

/// Where a token's staking flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StakingStatus {
    /// No flow in progress.
    Start,
    /// Spending approval transaction submitted.
    ApprovalPending,
    /// Staking transaction submitted.
    StakingPending,
    /// Withdrawal transaction submitted.
    WithdrawPending,
}

// ============================================================================
// PopupSize
// ============================================================================

/// Pixel presets for approval popups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupSize {
    /// Compact confirmation dialog.
    Small,
    /// Full request review.
    Large,
}

impl PopupSize {
    /// Returns `(width, height)` in pixels.
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Small => (400, 460),
            Self::Large => (400, 600),
        }
    }
}

// ============================================================================
// WalletStore
// ============================================================================

/// Read/write access to the wallet's application state.
pub trait WalletStore: Send + Sync {
    /// Active account address, if the wallet is set up.
    fn account_address(&self) -> Option<String>;

    /// Claims registry contract address for the active network.
    fn claims_registry_address(&self) -> String;

    /// ERC-20 contract address for a token.
    fn token_contract_address(&self, token: TokenSymbol) -> String;

    /// Staking contract address for a token.
    fn staking_contract_address(&self, token: TokenSymbol) -> String;

    /// All stored credentials.
    fn credentials(&self) -> Vec<Credential>;

    /// Looks up one credential by id.
    fn credential(&self, id: &str) -> Option<Credential>;

    /// Adds or replaces a credential.
    fn add_credential(&self, credential: Credential);

    /// Records a registry verdict for a credential.
    fn set_credential_valid(&self, id: &str, valid: bool);

    /// Records a pending verification request.
    fn add_verification_request(&self, request: VerificationRequest);

    /// Marks a verification request declined.
    fn decline_verification_request(&self, id: RequestId);

    /// Moves a token's staking flow to a new state.
    fn set_staking_status(&self, token: TokenSymbol, status: StakingStatus);
}

// ============================================================================
// WindowService
// ============================================================================

/// Popup window control for approval flows.
pub trait WindowService: Send + Sync {
    /// Opens an approval popup.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses to open a window.
    fn create_popup(&self, size: PopupSize) -> Result<WindowId>;

    /// Closes a previously opened window. Unknown ids are ignored.
    fn close_window(&self, id: WindowId);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_token_symbol_wire_names() {
        assert_eq!(serde_json::to_string(&TokenSymbol::Fcl).unwrap(), "\"FCL\"");
        assert_eq!(
            serde_json::to_string(&TokenSymbol::FclEth).unwrap(),
            "\"FCL_ETH\""
        );
    }

    #[test]
    fn test_staking_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&StakingStatus::ApprovalPending).unwrap(),
            "\"APPROVAL_PENDING\""
        );
    }

    #[test]
    fn test_verification_request_validation() {
        let valid = VerificationRequest::new(
            "https://dapp.example.com",
            "plus+liveness",
            BTreeMap::from([("name".to_string(), true)]),
        );
        assert!(valid.validate());

        let mut no_level = valid.clone();
        no_level.level = String::new();
        assert!(!no_level.validate());

        let mut empty_field = valid;
        empty_field.fields.insert(String::new(), true);
        assert!(!empty_field.validate());
    }

    #[test]
    fn test_credential_omits_absent_transaction() {
        let bare = Credential::new("cred-1", "basic", true);
        let json = serde_json::to_value(&bare).expect("serialize");
        assert!(json.get("transaction").is_none());

        let mut committed = Credential::new("cred-1", "basic", true);
        committed.transaction = Some(json!({"hash": "0x1"}));
        let json = serde_json::to_value(&committed).expect("serialize");
        assert_eq!(json["transaction"]["hash"], json!("0x1"));
    }

    #[test]
    fn test_popup_dimensions() {
        assert_eq!(PopupSize::Large.dimensions(), (400, 600));
        assert_eq!(PopupSize::Small.dimensions(), (400, 460));
    }
}
