//! Account records.
//!
//! An [`Account`] is the durable per-account snapshot. Balance changes are
//! only made by applying a [`TransactionRecord`], which also appends the
//! record's id to the account history. Applying a record that is already in
//! the history is a no-op, which is what makes journal replay idempotent.

use super::error::LedgerError;
use super::journal::{TransactionId, TransactionRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique, immutable account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        AccountId(Uuid::new_v4())
    }

    /// The all-zero id. Never assigned to an account.
    pub fn nil() -> Self {
        AccountId(Uuid::nil())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(AccountId)
    }
}

/// Addressable account attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountField {
    /// Read-only through `set_field`; changes go through transfers.
    Balance,
    CredentialHash,
    Enterprise,
    OneTimeSource,
    Profile(String),
}

impl fmt::Display for AccountField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountField::Balance => f.write_str("balance"),
            AccountField::CredentialHash => f.write_str("credential_hash"),
            AccountField::Enterprise => f.write_str("enterprise"),
            AccountField::OneTimeSource => f.write_str("one_time_source"),
            AccountField::Profile(name) => write!(f, "profile.{}", name),
        }
    }
}

/// Value of an account attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Amount(u64),
    Flag(bool),
    Text(String),
}

/// Durable account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    credential_hash: String,
    balance: u64,
    #[serde(default)]
    profile: BTreeMap<String, String>,
    #[serde(default)]
    enterprise: bool,
    #[serde(default)]
    one_time_source: bool,
    /// Transactions touching this account, in commit order.
    #[serde(default)]
    history: Vec<TransactionId>,
}

impl Account {
    pub fn new(id: AccountId, credential_hash: &str, balance: u64) -> Self {
        Account {
            id,
            credential_hash: credential_hash.to_string(),
            balance,
            profile: BTreeMap::new(),
            enterprise: false,
            one_time_source: false,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn credential_hash(&self) -> &str {
        &self.credential_hash
    }

    pub fn is_enterprise(&self) -> bool {
        self.enterprise
    }

    pub fn history(&self) -> &[TransactionId] {
        &self.history
    }

    /// Check that `amount` can be debited.
    pub fn check_debit(&self, amount: u64) -> Result<(), LedgerError> {
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                available: self.balance,
                requested: amount,
            });
        }
        Ok(())
    }

    /// Check that `amount` can be credited.
    pub fn check_credit(&self, amount: u64) -> Result<(), LedgerError> {
        self.balance
            .checked_add(amount)
            .map(|_| ())
            .ok_or(LedgerError::BalanceOverflow)
    }

    /// Apply this account's side of a transfer.
    ///
    /// Returns `false` if the record was already applied or does not involve
    /// this account.
    pub fn apply(&mut self, record: &TransactionRecord) -> Result<bool, LedgerError> {
        if self.history.contains(&record.id) {
            return Ok(false);
        }

        let mut balance = self.balance;
        let mut touched = false;

        if record.from == self.id {
            self.check_debit(record.amount)?;
            balance -= record.amount;
            touched = true;
        }
        if record.to == self.id {
            balance = balance
                .checked_add(record.amount)
                .ok_or(LedgerError::BalanceOverflow)?;
            touched = true;
        }

        if touched {
            self.balance = balance;
            self.history.push(record.id);
        }
        Ok(touched)
    }

    /// Read an attribute. Unset profile attributes yield `None`.
    pub fn get(&self, field: &AccountField) -> Option<FieldValue> {
        match field {
            AccountField::Balance => Some(FieldValue::Amount(self.balance)),
            AccountField::CredentialHash => Some(FieldValue::Text(self.credential_hash.clone())),
            AccountField::Enterprise => Some(FieldValue::Flag(self.enterprise)),
            AccountField::OneTimeSource => Some(FieldValue::Flag(self.one_time_source)),
            AccountField::Profile(name) => self.profile.get(name).cloned().map(FieldValue::Text),
        }
    }

    /// Write an attribute.
    pub fn set(&mut self, field: &AccountField, value: FieldValue) -> Result<(), LedgerError> {
        match (field, value) {
            (AccountField::Balance, _) => Err(LedgerError::ReadOnlyField(field.to_string())),
            (AccountField::CredentialHash, FieldValue::Text(hash)) => {
                self.credential_hash = hash;
                Ok(())
            }
            (AccountField::Enterprise, FieldValue::Flag(flag)) => {
                self.enterprise = flag;
                Ok(())
            }
            (AccountField::OneTimeSource, FieldValue::Flag(flag)) => {
                self.one_time_source = flag;
                Ok(())
            }
            (AccountField::Profile(name), FieldValue::Text(text)) => {
                self.profile.insert(name.clone(), text);
                Ok(())
            }
            _ => Err(LedgerError::FieldType(field.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(from: AccountId, to: AccountId, amount: u64) -> TransactionRecord {
        TransactionRecord::new(from, to, amount)
    }

    #[test]
    fn account_id_round_trips_through_text() {
        let id = AccountId::new();
        let parsed: AccountId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<AccountId>().is_err());
    }

    #[test]
    fn apply_debits_and_credits() {
        let mut sender = Account::new(AccountId::new(), "hash-a", 100);
        let mut recipient = Account::new(AccountId::new(), "hash-b", 100);
        let record = transfer(sender.id(), recipient.id(), 40);

        assert!(sender.apply(&record).unwrap());
        assert!(recipient.apply(&record).unwrap());
        assert_eq!(sender.balance(), 60);
        assert_eq!(recipient.balance(), 140);
        assert_eq!(sender.history(), &[record.id]);
        assert_eq!(recipient.history(), &[record.id]);
    }

    #[test]
    fn apply_is_idempotent() {
        let mut sender = Account::new(AccountId::new(), "hash", 100);
        let record = transfer(sender.id(), AccountId::new(), 25);

        assert!(sender.apply(&record).unwrap());
        assert!(!sender.apply(&record).unwrap());
        assert_eq!(sender.balance(), 75);
        assert_eq!(sender.history().len(), 1);
    }

    #[test]
    fn apply_ignores_unrelated_records() {
        let mut account = Account::new(AccountId::new(), "hash", 100);
        let record = transfer(AccountId::new(), AccountId::new(), 10);
        assert!(!account.apply(&record).unwrap());
        assert_eq!(account.balance(), 100);
        assert!(account.history().is_empty());
    }

    #[test]
    fn apply_rejects_overdraft_without_mutation() {
        let mut sender = Account::new(AccountId::new(), "hash", 10);
        let record = transfer(sender.id(), AccountId::new(), 11);
        assert!(matches!(
            sender.apply(&record),
            Err(LedgerError::InsufficientFunds {
                available: 10,
                requested: 11
            })
        ));
        assert_eq!(sender.balance(), 10);
        assert!(sender.history().is_empty());
    }

    #[test]
    fn credit_overflow_detected() {
        let account = Account::new(AccountId::new(), "hash", u64::MAX);
        assert!(matches!(
            account.check_credit(1),
            Err(LedgerError::BalanceOverflow)
        ));
    }

    #[test]
    fn field_access() {
        let mut account = Account::new(AccountId::new(), "hash", 5);
        let nickname = AccountField::Profile("nickname".to_string());

        assert_eq!(account.get(&nickname), None);
        account
            .set(&nickname, FieldValue::Text("sky".to_string()))
            .unwrap();
        assert_eq!(account.get(&nickname), Some(FieldValue::Text("sky".to_string())));

        account
            .set(&AccountField::Enterprise, FieldValue::Flag(true))
            .unwrap();
        assert!(account.is_enterprise());

        assert!(matches!(
            account.set(&AccountField::Balance, FieldValue::Amount(1_000)),
            Err(LedgerError::ReadOnlyField(_))
        ));
        assert!(matches!(
            account.set(&AccountField::OneTimeSource, FieldValue::Text("yes".to_string())),
            Err(LedgerError::FieldType(_))
        ));
        assert_eq!(account.get(&AccountField::Balance), Some(FieldValue::Amount(5)));
    }
}
