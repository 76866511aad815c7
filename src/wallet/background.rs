//! The background context's handler set.
//!
//! [`BackgroundBroker`] installs the wallet's remote-callable operations
//! on the background connections: credential storage and checks, the
//! staking flow, wallet pass-throughs to the in-page provider, and the
//! approval flow that suspends on a [`RequestsWatcher`] until the popup
//! reports a decision.
//!
//! Requests arriving from the page are gated by [`OriginMiddleware`]
//! and/or [`AuthMiddleware`]; commits toward the in-page provider are
//! plain invokes with the `Inpage` destination override.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::debug;
use url::Url;

use crate::connection::base::Connection;
use crate::connection::middleware::{
    AuthMiddleware, Middleware, OriginMiddleware, SessionProvider,
};
use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{EndpointName, Method};
use crate::watcher::RequestsWatcher;

use super::store::{
    Credential, PopupSize, StakingStatus, TokenSymbol, VerificationRequest, WalletStore,
    WindowService,
};

// ============================================================================
// Constants
// ============================================================================

/// Registry verdict marking a credential as good.
const CREDENTIAL_STATUS_VALID: &str = "VALID";

// ============================================================================
// BackgroundBroker
// ============================================================================

/// Wires the wallet's background handlers onto its connections.
///
/// Holds the capabilities the handlers need; the connections themselves
/// are passed in, never created here.
pub struct BackgroundBroker {
    connection: Connection,
    store: Arc<dyn WalletStore>,
    windows: Arc<dyn WindowService>,
    sessions: Arc<dyn SessionProvider>,
    watcher: RequestsWatcher,
    allowed_origins: Vec<Url>,
}

impl BackgroundBroker {
    /// Creates a broker over the content-script-facing connection.
    #[must_use]
    pub fn new(
        connection: Connection,
        store: Arc<dyn WalletStore>,
        windows: Arc<dyn WindowService>,
        sessions: Arc<dyn SessionProvider>,
        watcher: RequestsWatcher,
        allowed_origins: Vec<Url>,
    ) -> Self {
        Self {
            connection,
            store,
            windows,
            sessions,
            watcher,
            allowed_origins,
        }
    }

    /// Registers every page-facing handler on the broker's connection.
    pub fn register_callbacks(&self) {
        self.register_credential_callbacks();
        self.register_staking_callbacks();
        self.register_wallet_callbacks();
    }

    /// Registers the approval drivers on the popup-facing connection.
    ///
    /// The popup is extension-internal, so these carry no middleware.
    pub fn register_popup_callbacks(&self, popup: &Connection) {
        {
            let watcher = self.watcher.clone();
            popup.on(
                Method::AcceptVerificationRequest,
                Box::new(move |args, _source| {
                    accept_verification(watcher.clone(), args).boxed()
                }),
                vec![],
            );
        }

        {
            let watcher = self.watcher.clone();
            popup.on(
                Method::DeclineVerificationRequest,
                Box::new(move |args, _source| {
                    decline_verification(watcher.clone(), args).boxed()
                }),
                vec![],
            );
        }
    }

    fn auth(&self) -> Vec<Arc<dyn Middleware>> {
        vec![Arc::new(AuthMiddleware::new(Arc::clone(&self.sessions)))]
    }

    fn origin_only(&self) -> Vec<Arc<dyn Middleware>> {
        vec![Arc::new(OriginMiddleware::new(
            self.allowed_origins.iter().cloned(),
        ))]
    }

    fn origin_and_auth(&self) -> Vec<Arc<dyn Middleware>> {
        vec![
            Arc::new(OriginMiddleware::new(self.allowed_origins.iter().cloned())),
            Arc::new(AuthMiddleware::new(Arc::clone(&self.sessions))),
        ]
    }
}

// ============================================================================
// BackgroundBroker - Credentials
// ============================================================================

impl BackgroundBroker {
    fn register_credential_callbacks(&self) {
        {
            let connection = self.connection.clone();
            let store = Arc::clone(&self.store);
            self.connection.on(
                Method::CredentialStoreRequest,
                Box::new(move |args, _source| {
                    credential_store(connection.clone(), Arc::clone(&store), args).boxed()
                }),
                self.origin_and_auth(),
            );
        }

        {
            let store = Arc::clone(&self.store);
            self.connection.on(
                Method::HasCredentialRequest,
                Box::new(move |args, _source| has_credential(Arc::clone(&store), args).boxed()),
                self.auth(),
            );
        }

        {
            let connection = self.connection.clone();
            let store = Arc::clone(&self.store);
            self.connection.on(
                Method::IsCredentialValidRequest,
                Box::new(move |args, _source| {
                    is_credential_valid(connection.clone(), Arc::clone(&store), args).boxed()
                }),
                self.auth(),
            );
        }

        {
            let store = Arc::clone(&self.store);
            let windows = Arc::clone(&self.windows);
            let watcher = self.watcher.clone();
            self.connection.on(
                Method::GetVerificationRequest,
                Box::new(move |args, _source| {
                    get_verification_request(
                        Arc::clone(&store),
                        Arc::clone(&windows),
                        watcher.clone(),
                        args,
                    )
                    .boxed()
                }),
                self.auth(),
            );
        }
    }
}

// ============================================================================
// BackgroundBroker - Staking
// ============================================================================

impl BackgroundBroker {
    fn register_staking_callbacks(&self) {
        {
            let connection = self.connection.clone();
            let store = Arc::clone(&self.store);
            self.connection.on(
                Method::GetStakingDetailsRequest,
                Box::new(move |args, _source| {
                    get_staking_details(connection.clone(), Arc::clone(&store), args).boxed()
                }),
                self.origin_and_auth(),
            );
        }

        {
            let connection = self.connection.clone();
            let store = Arc::clone(&self.store);
            self.connection.on(
                Method::ApproveStakeRequest,
                Box::new(move |args, _source| {
                    approve_stake(connection.clone(), Arc::clone(&store), args).boxed()
                }),
                self.origin_and_auth(),
            );
        }

        {
            let connection = self.connection.clone();
            let store = Arc::clone(&self.store);
            self.connection.on(
                Method::StakeRequest,
                Box::new(move |args, _source| {
                    stake(connection.clone(), Arc::clone(&store), args).boxed()
                }),
                self.origin_and_auth(),
            );
        }

        {
            let connection = self.connection.clone();
            let store = Arc::clone(&self.store);
            self.connection.on(
                Method::WithdrawRequest,
                Box::new(move |args, _source| {
                    withdraw(connection.clone(), Arc::clone(&store), args).boxed()
                }),
                self.origin_and_auth(),
            );
        }

        {
            let store = Arc::clone(&self.store);
            self.connection.on(
                Method::ResetStakingRequest,
                Box::new(move |args, _source| reset_staking(Arc::clone(&store), args).boxed()),
                self.origin_and_auth(),
            );
        }
    }
}

// ============================================================================
// BackgroundBroker - Wallet
// ============================================================================

impl BackgroundBroker {
    fn register_wallet_callbacks(&self) {
        {
            let connection = self.connection.clone();
            self.connection.on(
                Method::GetAccountAddress,
                Box::new(move |_args, _source| {
                    let connection = connection.clone();
                    async move {
                        connection
                            .invoke_to(Method::GetAccountAddressCommit, vec![], EndpointName::Inpage)
                            .await
                    }
                    .boxed()
                }),
                self.origin_and_auth(),
            );
        }

        {
            let connection = self.connection.clone();
            let store = Arc::clone(&self.store);
            self.connection.on(
                Method::GetSignedNonce,
                Box::new(move |args, _source| {
                    get_signed_nonce(connection.clone(), Arc::clone(&store), args).boxed()
                }),
                self.origin_and_auth(),
            );
        }

        {
            let connection = self.connection.clone();
            self.connection.on(
                Method::GetBackendSession,
                Box::new(move |_args, _source| {
                    let connection = connection.clone();
                    async move {
                        connection
                            .invoke_to(Method::GetBackendSessionCommit, vec![], EndpointName::Inpage)
                            .await
                    }
                    .boxed()
                }),
                // Runs during login, before a session exists.
                self.origin_only(),
            );
        }

        {
            let store = Arc::clone(&self.store);
            self.connection.on(
                Method::SetupPluginRequest,
                Box::new(move |_args, _source| {
                    let store = Arc::clone(&store);
                    async move { Ok(json!(store.account_address())) }.boxed()
                }),
                self.origin_only(),
            );
        }

        self.connection.on(
            Method::VerifyConnectionRequest,
            Box::new(|_args, _source| async { Ok(json!(true)) }.boxed()),
            vec![],
        );
    }
}

// ============================================================================
// Handlers - Credentials
// ============================================================================

async fn credential_store(
    connection: Connection,
    store: Arc<dyn WalletStore>,
    args: Vec<Value>,
) -> Result<Value> {
    let credential_value = arg(&args, 0, "credential")?.clone();
    let mut credential: Credential = serde_json::from_value(credential_value.clone())?;
    let address = account_address(store.as_ref())?;
    let registry = store.claims_registry_address();

    let transaction = connection
        .invoke_to(
            Method::CredentialStoreCommit,
            vec![json!(address), credential_value, json!(registry)],
            EndpointName::Inpage,
        )
        .await?;

    credential.transaction = Some(transaction.clone());
    store.add_credential(credential);

    Ok(transaction)
}

async fn has_credential(store: Arc<dyn WalletStore>, args: Vec<Value>) -> Result<Value> {
    let id = string_arg(&args, 0, "id")?;
    Ok(json!(store.credential(&id).is_some()))
}

async fn is_credential_valid(
    connection: Connection,
    store: Arc<dyn WalletStore>,
    args: Vec<Value>,
) -> Result<Value> {
    let id = string_arg(&args, 0, "id")?;
    let credential = store
        .credential(&id)
        .ok_or_else(|| Error::credential_not_found(&id))?;

    let address = account_address(store.as_ref())?;
    let registry = store.claims_registry_address();

    let status = connection
        .invoke_to(
            Method::GetCredentialStatusCommit,
            vec![json!(address), json!(credential), json!(registry)],
            EndpointName::Inpage,
        )
        .await?;

    let valid = status.as_str() == Some(CREDENTIAL_STATUS_VALID);
    store.set_credential_valid(&id, valid);

    Ok(json!(valid))
}

async fn get_verification_request(
    store: Arc<dyn WalletStore>,
    windows: Arc<dyn WindowService>,
    watcher: RequestsWatcher,
    args: Vec<Value>,
) -> Result<Value> {
    let level = string_arg(&args, 0, "level")?;
    let requester = string_arg(&args, 1, "requester")?;
    let fields: BTreeMap<String, bool> = match args.get(2) {
        Some(value) => serde_json::from_value(value.clone())?,
        None => BTreeMap::new(),
    };

    let request = VerificationRequest::new(requester, level.clone(), fields);
    if !request.validate() {
        return Err(Error::invalid_argument("invalid verification request fields"));
    }

    let has_match = store
        .credentials()
        .iter()
        .any(|credential| credential.level == level && credential.valid);
    if !has_match {
        return Err(Error::CredentialsNotFound);
    }

    let id = request.id;
    store.add_verification_request(request);

    let window = windows.create_popup(PopupSize::Large)?;
    debug!(%id, %window, "Awaiting user verification decision");

    // Exactly one of the three callbacks fires; it takes the settle slot.
    let (settle_tx, settle_rx) = oneshot::channel();
    let settle = Arc::new(Mutex::new(Some(settle_tx)));

    let on_accepted = {
        let windows = Arc::clone(&windows);
        let settle = Arc::clone(&settle);
        move |payload: Value| {
            windows.close_window(window);
            if let Some(tx) = settle.lock().take() {
                let _ = tx.send(Ok(payload));
            }
        }
    };

    let on_declined = {
        let windows = Arc::clone(&windows);
        let settle = Arc::clone(&settle);
        move || {
            windows.close_window(window);
            if let Some(tx) = settle.lock().take() {
                let _ = tx.send(Err(Error::request_declined(id)));
            }
        }
    };

    let on_timeout = {
        let windows = Arc::clone(&windows);
        let store = Arc::clone(&store);
        move || {
            windows.close_window(window);
            store.decline_verification_request(id);
            if let Some(tx) = settle.lock().take() {
                let _ = tx.send(Err(Error::request_expired(id)));
            }
        }
    };

    watcher.listen_for_request(
        id,
        Box::new(on_accepted),
        Box::new(on_declined),
        Box::new(on_timeout),
    );

    match settle_rx.await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::ConnectionClosed),
    }
}

async fn accept_verification(watcher: RequestsWatcher, args: Vec<Value>) -> Result<Value> {
    let id = request_id_arg(&args, 0)?;
    let payload = args.get(1).cloned().unwrap_or(Value::Null);
    Ok(json!(watcher.accept(id, payload)))
}

async fn decline_verification(watcher: RequestsWatcher, args: Vec<Value>) -> Result<Value> {
    let id = request_id_arg(&args, 0)?;
    Ok(json!(watcher.decline(id)))
}

// ============================================================================
// Handlers - Staking
// ============================================================================

async fn get_staking_details(
    connection: Connection,
    store: Arc<dyn WalletStore>,
    args: Vec<Value>,
) -> Result<Value> {
    let token = token_arg(&args, 0)?;
    let address = account_address(store.as_ref())?;

    connection
        .invoke_to(
            Method::GetStakingDetailsCommit,
            vec![
                json!(address),
                json!(store.token_contract_address(token)),
                json!(store.staking_contract_address(token)),
            ],
            EndpointName::Inpage,
        )
        .await
}

async fn approve_stake(
    connection: Connection,
    store: Arc<dyn WalletStore>,
    args: Vec<Value>,
) -> Result<Value> {
    let amount = string_arg(&args, 0, "amount")?;
    let token = token_arg(&args, 1)?;
    let address = account_address(store.as_ref())?;

    let transaction = connection
        .invoke_to(
            Method::ApproveStakeCommit,
            vec![
                json!(address),
                json!(amount),
                json!(store.token_contract_address(token)),
                json!(store.staking_contract_address(token)),
            ],
            EndpointName::Inpage,
        )
        .await?;

    store.set_staking_status(token, StakingStatus::ApprovalPending);
    Ok(transaction)
}

async fn stake(
    connection: Connection,
    store: Arc<dyn WalletStore>,
    args: Vec<Value>,
) -> Result<Value> {
    let amount = string_arg(&args, 0, "amount")?;
    let token = token_arg(&args, 1)?;
    let credential_id = string_arg(&args, 2, "credential_id")?;
    let address = account_address(store.as_ref())?;

    let credential = store
        .credential(&credential_id)
        .ok_or_else(|| Error::credential_not_found(&credential_id))?;

    let transaction = connection
        .invoke_to(
            Method::StakeCommit,
            vec![
                json!(address),
                json!(amount),
                json!(credential),
                json!(store.token_contract_address(token)),
                json!(store.staking_contract_address(token)),
            ],
            EndpointName::Inpage,
        )
        .await?;

    store.set_staking_status(token, StakingStatus::StakingPending);
    Ok(transaction)
}

async fn withdraw(
    connection: Connection,
    store: Arc<dyn WalletStore>,
    args: Vec<Value>,
) -> Result<Value> {
    let token = token_arg(&args, 0)?;
    let address = account_address(store.as_ref())?;

    let transaction = connection
        .invoke_to(
            Method::WithdrawCommit,
            vec![json!(address), json!(store.staking_contract_address(token))],
            EndpointName::Inpage,
        )
        .await?;

    store.set_staking_status(token, StakingStatus::WithdrawPending);
    Ok(transaction)
}

async fn reset_staking(store: Arc<dyn WalletStore>, args: Vec<Value>) -> Result<Value> {
    let token = token_arg(&args, 0)?;
    store.set_staking_status(token, StakingStatus::Start);
    Ok(Value::Null)
}

// ============================================================================
// Handlers - Wallet
// ============================================================================

async fn get_signed_nonce(
    connection: Connection,
    store: Arc<dyn WalletStore>,
    args: Vec<Value>,
) -> Result<Value> {
    let nonce = string_arg(&args, 0, "nonce")?;
    let address = account_address(store.as_ref())?;

    connection
        .invoke_to(
            Method::GetSignedNonceCommit,
            vec![json!(nonce), json!(address)],
            EndpointName::Inpage,
        )
        .await
}

// ============================================================================
// Arg Helpers
// ============================================================================

fn arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a Value> {
    args.get(index)
        .ok_or_else(|| Error::invalid_argument(format!("missing argument {index} ({name})")))
}

fn string_arg(args: &[Value], index: usize, name: &str) -> Result<String> {
    arg(args, index, name)?
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| Error::invalid_argument(format!("argument {index} ({name}) must be a string")))
}

fn token_arg(args: &[Value], index: usize) -> Result<TokenSymbol> {
    Ok(serde_json::from_value(arg(args, index, "token")?.clone())?)
}

fn request_id_arg(args: &[Value], index: usize) -> Result<RequestId> {
    Ok(serde_json::from_value(arg(args, index, "request_id")?.clone())?)
}

fn account_address(store: &dyn WalletStore) -> Result<String> {
    store
        .account_address()
        .ok_or_else(|| Error::invalid_argument("wallet has no active account"))
}

// ============================================================================
// Tests
// ============================================================================
