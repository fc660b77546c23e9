//! Account endpoints: registration, login, balance, transfers, history and
//! profile attributes.

use super::{authenticate, decode, encode, settle, Outcome};
use crate::ledger::{AccountField, AccountId, FieldValue, Ledger, TransactionRecord};
use crate::registry::{HandlerResult, RegistryBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub(super) fn register(builder: RegistryBuilder, ledger: Arc<Ledger>) -> RegistryBuilder {
    let register = Arc::clone(&ledger);
    let login = Arc::clone(&ledger);
    let info = Arc::clone(&ledger);
    let transfer = Arc::clone(&ledger);
    let history = Arc::clone(&ledger);
    let profile = ledger;

    builder
        .text(
            "/api/account/register",
            "Register a new account for a secret hash.",
            move |text| register_account(&register, text),
        )
        .text(
            "/api/login",
            "Look up the account registered for a secret hash.",
            move |text| login_account(&login, text),
        )
        .text(
            "/api/account/info",
            "Get the balance of an account.",
            move |text| account_info(&info, text),
        )
        .text(
            "/api/account/transfer",
            "Transfer funds to another account.",
            move |text| transfer_funds(&transfer, text),
        )
        .text(
            "/api/account/history",
            "List the transfers of an account, oldest first.",
            move |text| account_history(&history, text),
        )
        .text(
            "/api/account/profile",
            "Read a profile attribute, or set it when a value is given.",
            move |text| account_profile(&profile, text),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HashRequest {
    #[serde(alias = "hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthRequest {
    #[serde(alias = "id")]
    id: String,
    #[serde(alias = "hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TransferRequest {
    #[serde(alias = "id")]
    id: String,
    #[serde(alias = "hash")]
    hash: String,
    #[serde(alias = "recipient")]
    recipient: String,
    #[serde(alias = "amount")]
    amount: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProfileRequest {
    #[serde(alias = "id")]
    id: String,
    #[serde(alias = "hash")]
    hash: String,
    #[serde(alias = "field")]
    field: String,
    #[serde(default, alias = "value")]
    value: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    success: bool,
    id: AccountId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BalanceResponse {
    success: bool,
    balance: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TransferView {
    id: String,
    from: AccountId,
    to: AccountId,
    amount: u64,
    committed_at: DateTime<Utc>,
}

impl From<TransactionRecord> for TransferView {
    fn from(record: TransactionRecord) -> Self {
        TransferView {
            id: record.id.to_string(),
            from: record.from,
            to: record.to,
            amount: record.amount,
            committed_at: record.committed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryResponse {
    success: bool,
    transactions: Vec<TransferView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ProfileResponse {
    success: bool,
    value: Option<String>,
}

fn register_account(ledger: &Ledger, text: &str) -> HandlerResult<String> {
    let Some(request) = decode::<HashRequest>(text) else {
        return Ok(None);
    };
    if request.hash.is_empty() {
        return Ok(None);
    }

    let id = settle(ledger.create_account(&request.hash))?;
    encode(&IdResponse {
        success: id.is_some(),
        id: id.unwrap_or_else(AccountId::nil),
    })
}

fn login_account(ledger: &Ledger, text: &str) -> HandlerResult<String> {
    let Some(request) = decode::<HashRequest>(text) else {
        return Ok(None);
    };
    if request.hash.is_empty() {
        return Ok(None);
    }

    let id = ledger.find_by_credential(&request.hash);
    encode(&IdResponse {
        success: id.is_some(),
        id: id.unwrap_or_else(AccountId::nil),
    })
}

fn account_info(ledger: &Ledger, text: &str) -> HandlerResult<String> {
    let Some(request) = decode::<AuthRequest>(text) else {
        return Ok(None);
    };
    let Some(id) = authenticate(ledger, &request.id, &request.hash)? else {
        return Ok(None);
    };

    let balance = settle(ledger.balance(id))?;
    encode(&BalanceResponse {
        success: balance.is_some(),
        balance: balance.unwrap_or(0),
    })
}

fn transfer_funds(ledger: &Ledger, text: &str) -> HandlerResult<String> {
    let Some(request) = decode::<TransferRequest>(text) else {
        return Ok(None);
    };
    let Ok(recipient) = request.recipient.parse::<AccountId>() else {
        return Ok(None);
    };
    let Some(id) = authenticate(ledger, &request.id, &request.hash)? else {
        return Ok(None);
    };

    let record = settle(ledger.transfer(id, recipient, request.amount))?;
    encode(&Outcome {
        success: record.is_some(),
    })
}

fn account_history(ledger: &Ledger, text: &str) -> HandlerResult<String> {
    let Some(request) = decode::<AuthRequest>(text) else {
        return Ok(None);
    };
    let Some(id) = authenticate(ledger, &request.id, &request.hash)? else {
        return Ok(None);
    };

    let history = settle(ledger.history(id))?;
    encode(&HistoryResponse {
        success: history.is_some(),
        transactions: history
            .unwrap_or_default()
            .into_iter()
            .map(TransferView::from)
            .collect(),
    })
}

fn account_profile(ledger: &Ledger, text: &str) -> HandlerResult<String> {
    let Some(request) = decode::<ProfileRequest>(text) else {
        return Ok(None);
    };
    let name = request.field.trim();
    if name.is_empty() {
        return Ok(None);
    }
    let Some(id) = authenticate(ledger, &request.id, &request.hash)? else {
        return Ok(None);
    };
    let field = AccountField::Profile(name.to_string());

    if let Some(value) = request.value {
        let stored = settle(ledger.set_field(id, field, FieldValue::Text(value.clone())))?;
        if stored.is_some() {
            info!(account = %id, field = name, "Profile updated");
        }
        return encode(&ProfileResponse {
            success: stored.is_some(),
            value: stored.map(|_| value),
        });
    }

    let value = match settle(ledger.get_field(id, &field))? {
        Some(Some(FieldValue::Text(text))) => Some(text),
        _ => None,
    };
    encode(&ProfileResponse {
        success: value.is_some(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use crate::protocol::Response;
    use serde_json::json;

    fn register(fixture: &Fixture, hash: &str) -> String {
        let reply = fixture.call_json("/api/account/register", json!({ "Hash": hash }));
        assert_eq!(reply["Success"], true);
        reply["Id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_register_and_login() {
        let fixture = Fixture::new();
        let id = register(&fixture, "secret");

        let login = fixture.call_json("/api/login", json!({ "hash": "secret" }));
        assert_eq!(login, json!({ "Success": true, "Id": id }));

        let missing = fixture.call_json("/api/login", json!({ "Hash": "other" }));
        assert_eq!(
            missing,
            json!({ "Success": false, "Id": "00000000-0000-0000-0000-000000000000" })
        );

        let again = fixture.call_json("/api/account/register", json!({ "Hash": "secret" }));
        assert_eq!(
            again,
            json!({ "Success": false, "Id": "00000000-0000-0000-0000-000000000000" })
        );
    }

    #[test]
    fn test_malformed_bodies_rejected() {
        let fixture = Fixture::new();
        assert_eq!(fixture.call("/api/account/register", "{not json"), Response::BadRequest);
        assert_eq!(fixture.call("/api/account/register", r#"{"Hash": ""}"#), Response::BadRequest);
        assert_eq!(fixture.call("/api/account/info", r#"{"Hash": "x"}"#), Response::BadRequest);
    }

    #[test]
    fn test_info_requires_matching_hash() {
        let fixture = Fixture::new();
        let id = register(&fixture, "secret");

        let info = fixture.call_json("/api/account/info", json!({ "Id": id, "Hash": "secret" }));
        assert_eq!(info, json!({ "Success": true, "Balance": 100 }));

        let body = json!({ "Id": id, "Hash": "wrong" }).to_string();
        assert_eq!(fixture.call("/api/account/info", &body), Response::BadRequest);
    }

    #[test]
    fn test_transfer_and_history() {
        let fixture = Fixture::new();
        let a = register(&fixture, "hash-a");
        let b = register(&fixture, "hash-b");

        let sent = fixture.call_json(
            "/api/account/transfer",
            json!({ "id": a, "hash": "hash-a", "recipient": b, "amount": 40 }),
        );
        assert_eq!(sent, json!({ "Success": true }));

        let overdraft = fixture.call_json(
            "/api/account/transfer",
            json!({ "Id": a, "Hash": "hash-a", "Recipient": b, "Amount": 1000 }),
        );
        assert_eq!(overdraft, json!({ "Success": false }));

        let info = fixture.call_json("/api/account/info", json!({ "Id": b, "Hash": "hash-b" }));
        assert_eq!(info["Balance"], 140);

        let history = fixture.call_json("/api/account/history", json!({ "Id": a, "Hash": "hash-a" }));
        assert_eq!(history["Success"], true);
        let transactions = history["Transactions"].as_array().unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0]["From"], a);
        assert_eq!(transactions[0]["To"], b);
        assert_eq!(transactions[0]["Amount"], 40);
    }

    #[test]
    fn test_profile_get_and_set() {
        let fixture = Fixture::new();
        let id = register(&fixture, "secret");

        let unset = fixture.call_json(
            "/api/account/profile",
            json!({ "Id": id, "Hash": "secret", "Field": "nickname" }),
        );
        assert_eq!(unset, json!({ "Success": false, "Value": null }));

        let set = fixture.call_json(
            "/api/account/profile",
            json!({ "Id": id, "Hash": "secret", "Field": "nickname", "Value": "sky" }),
        );
        assert_eq!(set, json!({ "Success": true, "Value": "sky" }));

        let read = fixture.call_json(
            "/api/account/profile",
            json!({ "Id": id, "Hash": "secret", "Field": "nickname" }),
        );
        assert_eq!(read, json!({ "Success": true, "Value": "sky" }));
    }
}
