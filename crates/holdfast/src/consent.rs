//! Popup consent: human-in-the-loop approval for sensitive operations
//! requested by external sites.
//!
//! The flow is a small state machine over the messenger —
//! `Opened → Connected → AwaitingInput → Resolved | Cancelled` — and the
//! [`SiteGateway`] runs it in front of every external-site command before
//! anything reaches the worker host.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::{
    errors::HoldfastError,
    host,
    messenger::{Messenger, Router},
    vault::Transaction,
};

/// Envelope kind for the consent request sent into a popup surface.
pub const CONSENT_KIND: &str = "consent";

/// Endpoint identity of the external-site gateway.
pub const GATEWAY_ID: &str = "site-gateway";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentState {
    Opened,
    Connected,
    AwaitingInput,
    Resolved,
    Cancelled,
}

/// What the user reviews inside the popup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentPayload {
    pub origin: String,
    pub method: String,
    pub params: Value,
}

/// Opens an isolated popup surface as a fresh messenger endpoint. The
/// surface shares no memory with its opener; everything it learns arrives
/// over the messenger.
pub trait ConsentSurface: Send + Sync {
    fn open(&self, router: &Router, surface_id: &str) -> Result<SurfaceGuard, HoldfastError>;
}

/// Keeps the popup endpoint alive; closing (or dropping) it tears the
/// surface down, which resolves any pending opener request.
pub struct SurfaceGuard {
    messenger: Messenger,
}

impl SurfaceGuard {
    pub const fn new(messenger: Messenger) -> Self {
        Self { messenger }
    }

    pub fn close(&self) {
        self.messenger.remove_listener();
    }
}

impl Drop for SurfaceGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run one consent exchange: open the surface, ping it alive, send the
/// request exactly once, await exactly one response, close the surface.
/// Teardown without a response comes back as `Cancelled`; the opener can
/// never hang on an abandoned popup.
pub async fn request_consent(
    opener: &Messenger,
    surface: &dyn ConsentSurface,
    payload: &ConsentPayload,
    ping_attempts: u32,
    timeout: Duration,
) -> Result<Value, HoldfastError> {
    let surface_id = format!("consent-{}", Uuid::new_v4());
    let mut state = ConsentState::Opened;
    let guard = surface.open(opener.router(), &surface_id)?;
    debug!(surface = %surface_id, ?state, method = %payload.method, "consent flow");

    let outcome = drive(opener, &surface_id, payload, ping_attempts, timeout, &mut state).await;
    guard.close();
    if outcome.is_err() {
        state = ConsentState::Cancelled;
    }
    debug!(surface = %surface_id, ?state, "consent flow finished");
    outcome
}

async fn drive(
    opener: &Messenger,
    surface_id: &str,
    payload: &ConsentPayload,
    ping_attempts: u32,
    timeout: Duration,
    state: &mut ConsentState,
) -> Result<Value, HoldfastError> {
    opener.ping(surface_id, ping_attempts).await?;
    *state = ConsentState::Connected;
    debug!(surface = %surface_id, ?state, "surface is live");

    *state = ConsentState::AwaitingInput;
    let response = opener
        .send_request(surface_id, CONSENT_KIND, payload, timeout)
        .await?;
    *state = ConsentState::Resolved;
    Ok(response)
}

/// Submits a fully signed envelope to the network. The consensus/RPC client
/// behind this seam is an external collaborator.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, transaction: &Transaction) -> Result<String, HoldfastError>;
}

#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub consent_timeout: Duration,
    pub vault_timeout: Duration,
    pub ping_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            consent_timeout: Duration::from_millis(120_000),
            vault_timeout: crate::messenger::DEFAULT_REQUEST_TIMEOUT,
            ping_attempts: crate::messenger::DEFAULT_PING_ATTEMPTS,
        }
    }
}

/// The external-site command surface. Every command is mediated by a consent
/// flow before it touches the vault.
pub struct SiteGateway {
    messenger: Messenger,
}

impl SiteGateway {
    pub fn spawn(
        router: &Router,
        surface: Arc<dyn ConsentSurface>,
        broadcaster: Arc<dyn Broadcaster>,
        config: GatewayConfig,
    ) -> Self {
        let messenger = router.register(GATEWAY_ID);
        let gateway = messenger.clone();
        messenger.on_request(move |origin, payload, responder| {
            let method = payload
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let params = payload.get("params").cloned().unwrap_or(Value::Null);
            let gateway = gateway.clone();
            let surface = Arc::clone(&surface);
            let broadcaster = Arc::clone(&broadcaster);
            drop(tokio::spawn(async move {
                let result = handle_site_request(
                    &gateway,
                    surface.as_ref(),
                    broadcaster.as_ref(),
                    config,
                    &origin,
                    &method,
                    params,
                )
                .await;
                match result {
                    Ok(value) => responder.send_data(value),
                    Err(e) => responder.send_error(&e),
                }
            }));
        });
        Self { messenger }
    }

    pub const fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub fn shutdown(&self) {
        self.messenger.remove_listener();
    }
}

async fn consent(
    gateway: &Messenger,
    surface: &dyn ConsentSurface,
    config: GatewayConfig,
    origin: &str,
    method: &str,
    params: &Value,
) -> Result<Value, HoldfastError> {
    let payload = ConsentPayload {
        origin: origin.to_owned(),
        method: method.to_owned(),
        params: params.clone(),
    };
    request_consent(
        gateway,
        surface,
        &payload,
        config.ping_attempts,
        config.consent_timeout,
    )
    .await
}

async fn handle_site_request(
    gateway: &Messenger,
    surface: &dyn ConsentSurface,
    broadcaster: &dyn Broadcaster,
    config: GatewayConfig,
    origin: &str,
    method: &str,
    params: Value,
) -> Result<Value, HoldfastError> {
    match method {
        "getAccounts" => {
            consent(gateway, surface, config, origin, method, &params).await?;
            host::call_vault(gateway, "getAccounts", Value::Null, config.vault_timeout).await
        }
        "requestPermissions" => {
            // The approval payload is the popup's answer: which accounts the
            // site may see.
            consent(gateway, surface, config, origin, method, &params).await
        }
        "signTransaction" => {
            consent(gateway, surface, config, origin, method, &params).await?;
            host::call_vault(gateway, "signTransaction", params, config.vault_timeout).await
        }
        "signAndSendTransaction" => {
            consent(gateway, surface, config, origin, method, &params).await?;
            let signed =
                host::call_vault(gateway, "signTransaction", params, config.vault_timeout).await?;
            let transaction: Transaction = serde_json::from_value(signed)
                .map_err(|e| HoldfastError::Internal(format!("decode signed envelope: {e}")))?;
            let signature = broadcaster.broadcast(&transaction)?;
            Ok(json!({ "signature": signature }))
        }
        other => Err(HoldfastError::InvalidRequest(format!(
            "unknown site method: {other}"
        ))),
    }
}
