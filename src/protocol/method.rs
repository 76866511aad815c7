//! The closed namespace of remote-callable methods.
//!
//! Every operation the wallet exposes across context boundaries is one
//! variant here. The wire names are part of the stable protocol contract:
//! `*_REQUEST` methods travel page → background, `*_COMMIT` methods travel
//! background → in-page provider, and the two verification methods travel
//! popup → background.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Method
// ============================================================================

/// A remote-callable operation name.
///
/// Each name is unique within the whole system and implicitly fixes the
/// shape of its argument tuple. Using a closed enum (instead of free-form
/// strings) makes handler registration exhaustiveness-checkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    // ------------------------------------------------------------------
    // Page/SDK → background
    // ------------------------------------------------------------------
    /// Store an attested credential in the wallet. Args: `[credential]`.
    #[serde(rename = "CREDENTIAL_STORE_REQUEST")]
    CredentialStoreRequest,

    /// Check whether a credential id is present. Args: `[id]`.
    #[serde(rename = "HAS_CREDENTIAL_REQUEST")]
    HasCredentialRequest,

    /// Check a stored credential against the registry. Args: `[id]`.
    #[serde(rename = "IS_CREDENTIAL_VALID_REQUEST")]
    IsCredentialValidRequest,

    /// Ask the user to approve sharing a credential. Args:
    /// `[level, requester, fields]`.
    #[serde(rename = "GET_VERIFICATION_REQUEST")]
    GetVerificationRequest,

    /// Read the active account address. Args: `[]`.
    #[serde(rename = "GET_ACCOUNT_ADDRESS")]
    GetAccountAddress,

    /// Sign a login nonce with the account key. Args: `[nonce]`.
    #[serde(rename = "GET_SIGNED_NONCE")]
    GetSignedNonce,

    /// Read the backend session token from the page. Args: `[]`.
    #[serde(rename = "GET_BACKEND_SESSION")]
    GetBackendSession,

    /// First-run plugin setup handshake. Args: `[]`.
    #[serde(rename = "SETUP_PLUGIN_REQUEST")]
    SetupPluginRequest,

    /// Liveness probe for the page ↔ extension link. Args: `[]`.
    #[serde(rename = "VERIFY_CONNECTION_REQUEST")]
    VerifyConnectionRequest,

    /// Approve token spending before staking. Args: `[amount, token]`.
    #[serde(rename = "APPROVE_STAKE_REQUEST")]
    ApproveStakeRequest,

    /// Stake tokens backed by a credential. Args:
    /// `[amount, token, credential_id]`.
    #[serde(rename = "STAKE_REQUEST")]
    StakeRequest,

    /// Withdraw the staked balance. Args: `[token]`.
    #[serde(rename = "WITHDRAW_REQUEST")]
    WithdrawRequest,

    /// Read pool/balance details for a token. Args: `[token]`.
    #[serde(rename = "GET_STAKING_DETAILS_REQUEST")]
    GetStakingDetailsRequest,

    /// Reset the staking flow state. Args: `[token]`.
    #[serde(rename = "RESET_STAKING_REQUEST")]
    ResetStakingRequest,

    // ------------------------------------------------------------------
    // Background → in-page provider
    // ------------------------------------------------------------------
    /// Submit a credential to the claims registry.
    #[serde(rename = "CREDENTIAL_STORE_COMMIT")]
    CredentialStoreCommit,

    /// Fetch a credential's on-chain status.
    #[serde(rename = "GET_CREDENTIAL_STATUS_COMMIT")]
    GetCredentialStatusCommit,

    /// Submit the spending approval transaction.
    #[serde(rename = "APPROVE_STAKE_COMMIT")]
    ApproveStakeCommit,

    /// Submit the staking transaction.
    #[serde(rename = "STAKE_COMMIT")]
    StakeCommit,

    /// Submit the withdrawal transaction.
    #[serde(rename = "WITHDRAW_COMMIT")]
    WithdrawCommit,

    /// Read staking details from the provider.
    #[serde(rename = "GET_STAKING_DETAILS_COMMIT")]
    GetStakingDetailsCommit,

    /// Read the provider's account address.
    #[serde(rename = "GET_ACCOUNT_ADDRESS_COMMIT")]
    GetAccountAddressCommit,

    /// Sign a nonce with the provider's key.
    #[serde(rename = "GET_SIGNED_NONCE_COMMIT")]
    GetSignedNonceCommit,

    /// Read the page's backend session token.
    #[serde(rename = "GET_BACKEND_SESSION_COMMIT")]
    GetBackendSessionCommit,

    // ------------------------------------------------------------------
    // Popup → background
    // ------------------------------------------------------------------
    /// User accepted a pending verification request. Args:
    /// `[request_id, request]`.
    #[serde(rename = "ACCEPT_VERIFICATION_REQUEST")]
    AcceptVerificationRequest,

    /// User declined a pending verification request. Args: `[request_id]`.
    #[serde(rename = "DECLINE_VERIFICATION_REQUEST")]
    DeclineVerificationRequest,
}

impl Method {
    /// All methods, in wire-name order. Used by registration loops and tests.
    pub const ALL: &'static [Method] = &[
        Method::CredentialStoreRequest,
        Method::HasCredentialRequest,
        Method::IsCredentialValidRequest,
        Method::GetVerificationRequest,
        Method::GetAccountAddress,
        Method::GetSignedNonce,
        Method::GetBackendSession,
        Method::SetupPluginRequest,
        Method::VerifyConnectionRequest,
        Method::ApproveStakeRequest,
        Method::StakeRequest,
        Method::WithdrawRequest,
        Method::GetStakingDetailsRequest,
        Method::ResetStakingRequest,
        Method::CredentialStoreCommit,
        Method::GetCredentialStatusCommit,
        Method::ApproveStakeCommit,
        Method::StakeCommit,
        Method::WithdrawCommit,
        Method::GetStakingDetailsCommit,
        Method::GetAccountAddressCommit,
        Method::GetSignedNonceCommit,
        Method::GetBackendSessionCommit,
        Method::AcceptVerificationRequest,
        Method::DeclineVerificationRequest,
    ];

    /// Returns the stable wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialStoreRequest => "CREDENTIAL_STORE_REQUEST",
            Self::HasCredentialRequest => "HAS_CREDENTIAL_REQUEST",
            Self::IsCredentialValidRequest => "IS_CREDENTIAL_VALID_REQUEST",
            Self::GetVerificationRequest => "GET_VERIFICATION_REQUEST",
            Self::GetAccountAddress => "GET_ACCOUNT_ADDRESS",
            Self::GetSignedNonce => "GET_SIGNED_NONCE",
            Self::GetBackendSession => "GET_BACKEND_SESSION",
            Self::SetupPluginRequest => "SETUP_PLUGIN_REQUEST",
            Self::VerifyConnectionRequest => "VERIFY_CONNECTION_REQUEST",
            Self::ApproveStakeRequest => "APPROVE_STAKE_REQUEST",
            Self::StakeRequest => "STAKE_REQUEST",
            Self::WithdrawRequest => "WITHDRAW_REQUEST",
            Self::GetStakingDetailsRequest => "GET_STAKING_DETAILS_REQUEST",
            Self::ResetStakingRequest => "RESET_STAKING_REQUEST",
            Self::CredentialStoreCommit => "CREDENTIAL_STORE_COMMIT",
            Self::GetCredentialStatusCommit => "GET_CREDENTIAL_STATUS_COMMIT",
            Self::ApproveStakeCommit => "APPROVE_STAKE_COMMIT",
            Self::StakeCommit => "STAKE_COMMIT",
            Self::WithdrawCommit => "WITHDRAW_COMMIT",
            Self::GetStakingDetailsCommit => "GET_STAKING_DETAILS_COMMIT",
            Self::GetAccountAddressCommit => "GET_ACCOUNT_ADDRESS_COMMIT",
            Self::GetSignedNonceCommit => "GET_SIGNED_NONCE_COMMIT",
            Self::GetBackendSessionCommit => "GET_BACKEND_SESSION_COMMIT",
            Self::AcceptVerificationRequest => "ACCEPT_VERIFICATION_REQUEST",
            Self::DeclineVerificationRequest => "DECLINE_VERIFICATION_REQUEST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
