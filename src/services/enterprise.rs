//! Enterprise account upgrades.

use super::{authenticate, decode, encode, settle, Outcome};
use crate::ledger::{AccountField, FieldValue, Ledger};
use crate::registry::{HandlerResult, RegistryBuilder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

pub(super) fn register(builder: RegistryBuilder, ledger: Arc<Ledger>) -> RegistryBuilder {
    builder.text(
        "/api/enterprise/upgrade",
        "Upgrade a regular account to an enterprise account.",
        move |text| upgrade(&ledger, text),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpgradeRequest {
    #[serde(alias = "id")]
    id: String,
    #[serde(alias = "hash")]
    hash: String,
}

fn upgrade(ledger: &Ledger, text: &str) -> HandlerResult<String> {
    let Some(request) = decode::<UpgradeRequest>(text) else {
        return Ok(None);
    };
    let Some(id) = authenticate(ledger, &request.id, &request.hash)? else {
        return Ok(None);
    };

    let upgraded = settle(ledger.set_field(id, AccountField::Enterprise, FieldValue::Flag(true)))?;
    if upgraded.is_some() {
        // The flag is already persisted at this point.
        if let Err(e) = ledger.append_log(id, "upgraded to enterprise") {
            warn!(account = %id, error = %e, "Failed to record upgrade note");
        }
        info!(account = %id, "Enterprise upgrade");
    }
    encode(&Outcome {
        success: upgraded.is_some(),
    })
}
