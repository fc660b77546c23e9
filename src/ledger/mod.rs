//! Durable per-account ledger.
//!
//! Provides a thread-safe account store with:
//! - One JSON snapshot per account under `accounts/`
//! - An append-only journal (`journal.log`) holding every committed transfer
//! - Per-account locking so concurrent transfers stay serializable
//! - Replay of the journal on open, repairing snapshots left stale by a crash
//!
//! # Transfer protocol
//!
//! 1. Lock both accounts in id order.
//! 2. Validate existence, amount and balances.
//! 3. Append the record to the journal and sync it. This is the commit point;
//!    a failed append is rolled back and nothing changes.
//! 4. Apply the record to both in-memory accounts (cannot fail after step 2).
//! 5. Rewrite both snapshots. A failure here is logged and repaired by replay.
//!
//! Readers only ever look at the in-memory accounts, which change under the
//! account locks after the commit point, so a half-applied transfer is never
//! visible.

mod account;
mod error;
mod journal;

pub use account::{Account, AccountField, AccountId, FieldValue};
pub use error::LedgerError;
pub use journal::{Journal, JournalEntry, TransactionId, TransactionRecord};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ACCOUNTS_DIR: &str = "accounts";
const JOURNAL_FILE: &str = "journal.log";

/// Thread-safe ledger backed by a data directory.
pub struct Ledger {
    accounts_dir: PathBuf,
    accounts: DashMap<AccountId, Arc<Mutex<Account>>>,
    /// credential hash -> account, for login lookups
    credentials: DashMap<String, AccountId>,
    journal: Mutex<Journal>,
    opening_balance: u64,
}

impl Ledger {
    /// Open the ledger in `data_dir`, creating it if needed.
    ///
    /// New accounts start with `opening_balance`.
    pub fn open(data_dir: impl AsRef<Path>, opening_balance: u64) -> Result<Self, LedgerError> {
        let data_dir = data_dir.as_ref();
        let accounts_dir = data_dir.join(ACCOUNTS_DIR);
        fs::create_dir_all(&accounts_dir)?;

        let mut loaded = HashMap::new();
        for entry in fs::read_dir(&accounts_dir)? {
            let path = entry?.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => {
                    let account: Account = serde_json::from_slice(&fs::read(&path)?)?;
                    loaded.insert(account.id(), account);
                }
                Some("tmp") => {
                    debug!(path = %path.display(), "Removing stale snapshot");
                    fs::remove_file(&path)?;
                }
                _ => {}
            }
        }

        let journal = Journal::open(data_dir.join(JOURNAL_FILE))?;
        let repaired = replay(&mut loaded, journal.transfers())?;

        let ledger = Ledger {
            accounts_dir,
            accounts: DashMap::new(),
            credentials: DashMap::new(),
            journal: Mutex::new(journal),
            opening_balance,
        };

        for id in &repaired {
            if let Some(account) = loaded.get(id) {
                ledger.write_snapshot(account)?;
            }
        }

        for (id, account) in loaded {
            ledger
                .credentials
                .insert(account.credential_hash().to_string(), id);
            ledger.accounts.insert(id, Arc::new(Mutex::new(account)));
        }

        info!(
            data_dir = %data_dir.display(),
            accounts = ledger.accounts.len(),
            transfers = ledger.journal.lock().transfers().len(),
            repaired = repaired.len(),
            "Ledger opened"
        );
        Ok(ledger)
    }

    /// Register a new account with the configured opening balance.
    pub fn create_account(&self, credential_hash: &str) -> Result<AccountId, LedgerError> {
        self.create_account_with_balance(credential_hash, self.opening_balance)
    }

    /// Register a new account with an explicit balance.
    ///
    /// Credential hashes are unique so that login is unambiguous.
    pub fn create_account_with_balance(
        &self,
        credential_hash: &str,
        balance: u64,
    ) -> Result<AccountId, LedgerError> {
        match self.credentials.entry(credential_hash.to_string()) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateCredential),
            Entry::Vacant(slot) => {
                let account = Account::new(AccountId::new(), credential_hash, balance);
                let id = account.id();
                self.write_snapshot(&account)?;
                self.accounts.insert(id, Arc::new(Mutex::new(account)));
                slot.insert(id);
                info!(account = %id, balance, "Account created");
                Ok(id)
            }
        }
    }

    /// Find the account registered with a credential hash.
    pub fn find_by_credential(&self, credential_hash: &str) -> Option<AccountId> {
        self.credentials.get(credential_hash).map(|id| *id)
    }

    /// Whether `credential_hash` matches the account's stored hash.
    pub fn verify_credential(
        &self,
        id: AccountId,
        credential_hash: &str,
    ) -> Result<bool, LedgerError> {
        let slot = self.slot(id)?;
        let account = slot.lock();
        Ok(account.credential_hash() == credential_hash)
    }

    pub fn balance(&self, id: AccountId) -> Result<u64, LedgerError> {
        Ok(self.slot(id)?.lock().balance())
    }

    /// Read an account attribute. Unset profile attributes yield `None`.
    pub fn get_field(
        &self,
        id: AccountId,
        field: &AccountField,
    ) -> Result<Option<FieldValue>, LedgerError> {
        Ok(self.slot(id)?.lock().get(field))
    }

    /// Write an account attribute.
    ///
    /// The snapshot is written before the in-memory record changes, so a
    /// failed write leaves the account untouched.
    pub fn set_field(
        &self,
        id: AccountId,
        field: AccountField,
        value: FieldValue,
    ) -> Result<(), LedgerError> {
        let slot = self.slot(id)?;
        let mut account = slot.lock();

        let mut updated = account.clone();
        updated.set(&field, value)?;

        if field == AccountField::CredentialHash {
            let old_hash = account.credential_hash().to_string();
            let new_hash = updated.credential_hash().to_string();
            if new_hash != old_hash {
                match self.credentials.entry(new_hash) {
                    Entry::Occupied(_) => return Err(LedgerError::DuplicateCredential),
                    Entry::Vacant(entry) => {
                        self.write_snapshot(&updated)?;
                        entry.insert(id);
                    }
                }
                self.credentials.remove(&old_hash);
                *account = updated;
                debug!(account = %id, %field, "Field updated");
                return Ok(());
            }
        }

        self.write_snapshot(&updated)?;
        *account = updated;
        debug!(account = %id, %field, "Field updated");
        Ok(())
    }

    /// Move `amount` from one account to another.
    ///
    /// On success the returned record is in the journal and in both account
    /// histories. On failure neither balance has changed.
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: u64,
    ) -> Result<TransactionRecord, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if from == to {
            return Err(LedgerError::SameAccount);
        }

        let from_slot = self.slot(from)?;
        let to_slot = self.slot(to)?;

        // Lock in id order so opposing transfers cannot deadlock.
        let (mut sender, mut recipient) = if from < to {
            let sender = from_slot.lock();
            let recipient = to_slot.lock();
            (sender, recipient)
        } else {
            let recipient = to_slot.lock();
            let sender = from_slot.lock();
            (sender, recipient)
        };

        sender.check_debit(amount)?;
        recipient.check_credit(amount)?;

        let record = TransactionRecord::new(from, to, amount);
        self.journal
            .lock()
            .append(&JournalEntry::Transfer(record.clone()))?;

        sender.apply(&record)?;
        recipient.apply(&record)?;

        for account in [&*sender, &*recipient] {
            if let Err(e) = self.write_snapshot(account) {
                warn!(
                    account = %account.id(),
                    transaction = %record.id,
                    error = %e,
                    "Snapshot write failed; journal replay will repair it"
                );
            }
        }

        info!(
            transaction = %record.id,
            from = %from,
            to = %to,
            amount,
            "Transfer committed"
        );
        Ok(record)
    }

    /// Append an audit note for an account to the journal.
    pub fn append_log(&self, id: AccountId, message: &str) -> Result<(), LedgerError> {
        self.slot(id)?;
        self.journal.lock().append(&JournalEntry::Note {
            account: id,
            message: message.to_string(),
            recorded_at: Utc::now(),
        })
    }

    /// Transfers touching an account, oldest first.
    pub fn history(&self, id: AccountId) -> Result<Vec<TransactionRecord>, LedgerError> {
        let ids = self.slot(id)?.lock().history().to_vec();
        let journal = self.journal.lock();
        Ok(ids.iter().filter_map(|tx| journal.get(tx).cloned()).collect())
    }

    /// Every committed transfer, in commit order.
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.journal.lock().transfers().to_vec()
    }

    #[cfg(test)]
    pub(crate) fn replace_journal_file(&self, file: File) {
        self.journal.lock().replace_file(file);
    }

    fn slot(&self, id: AccountId) -> Result<Arc<Mutex<Account>>, LedgerError> {
        self.accounts
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// Atomically replace an account snapshot (write temp, sync, rename).
    fn write_snapshot(&self, account: &Account) -> Result<(), LedgerError> {
        let path = self.accounts_dir.join(format!("{}.json", account.id()));
        let tmp = self.accounts_dir.join(format!("{}.json.tmp", account.id()));

        let bytes = serde_json::to_vec_pretty(account)?;
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Re-apply journal records missing from the loaded snapshots.
///
/// Returns the ids of accounts that changed.
fn replay(
    accounts: &mut HashMap<AccountId, Account>,
    transfers: &[TransactionRecord],
) -> Result<Vec<AccountId>, LedgerError> {
    let mut repaired = Vec::new();

    for (i, record) in transfers.iter().enumerate() {
        for id in [record.from, record.to] {
            let account = accounts
                .get_mut(&id)
                .ok_or_else(|| LedgerError::CorruptJournal {
                    line: i + 1,
                    reason: format!("transfer {} references unknown account {}", record.id, id),
                })?;

            if account.apply(record)? {
                debug!(account = %id, transaction = %record.id, "Replayed transfer");
                if !repaired.contains(&id) {
                    repaired.push(id);
                }
            }
        }
    }

    Ok(repaired)
}
