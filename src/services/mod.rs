//! Built-in endpoints.
//!
//! Every JSON endpoint follows the same contract:
//! - a body that does not decode, or fails validation, is rejected (400)
//! - a business failure answers `{"Success": false}`
//! - a storage fault in the ledger is a handler error (500)

mod account;
mod docs;
mod enterprise;
mod example;

use crate::ledger::{AccountId, Ledger, LedgerError};
use crate::registry::{HandlerError, HandlerResult, RegistryBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Register every built-in endpoint.
pub fn register_all(builder: RegistryBuilder, ledger: Arc<Ledger>) -> RegistryBuilder {
    let builder = account::register(builder, Arc::clone(&ledger));
    let builder = enterprise::register(builder, ledger);
    let builder = docs::register(builder);
    example::register(builder)
}

/// Decode a JSON request body. `None` rejects the request.
fn decode<T: DeserializeOwned>(text: &str) -> Option<T> {
    match serde_json::from_str(text) {
        Ok(request) => Some(request),
        Err(e) => {
            debug!(error = %e, "Rejecting malformed request body");
            None
        }
    }
}

fn encode<T: Serialize>(response: &T) -> HandlerResult<String> {
    Ok(Some(serde_json::to_string(response)?))
}

/// Split a ledger result into success, business failure (`None`) or fault.
fn settle<T>(result: Result<T, LedgerError>) -> Result<Option<T>, HandlerError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fault() => Err(e.into()),
        Err(e) => {
            debug!(error = %e, "Ledger rejected request");
            Ok(None)
        }
    }
}

/// Resolve `id` and check it against `hash`.
///
/// `None` when the id is malformed, unknown, or the hash does not match.
fn authenticate(ledger: &Ledger, id: &str, hash: &str) -> Result<Option<AccountId>, HandlerError> {
    let Ok(id) = id.parse::<AccountId>() else {
        return Ok(None);
    };
    if hash.is_empty() {
        return Ok(None);
    }
    match settle(ledger.verify_credential(id, hash))? {
        Some(true) => Ok(Some(id)),
        _ => Ok(None),
    }
}

/// `{"Success": ...}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Outcome {
    success: bool,
}
