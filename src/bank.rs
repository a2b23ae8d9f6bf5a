//! Settlement accounts payments are received into
use super::error::{Entity, Error, Result, ValidationError};
use super::order::PaymentSnapshot;
use super::store::{self, Store};
use super::types::{BankAccountId, TimeStamp};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct BankAccount {
    #[n(0)]
    pub id: BankAccountId,
    #[n(1)]
    pub acct_no: String,
    #[n(2)]
    pub bank_name: String,
    #[n(3)]
    pub account_name: String,
    #[n(4)]
    pub location_id: Option<String>, // None serves every location
    #[n(5)]
    pub is_active: bool,
    #[n(6)]
    pub updated_at: TimeStamp<Utc>,
}

impl BankAccount {
    pub fn serves(&self, location_id: &str) -> bool {
        self.location_id
            .as_deref()
            .is_none_or(|location| location == location_id)
    }
    pub fn snapshot(&self) -> PaymentSnapshot {
        PaymentSnapshot {
            bank_account_id: self.id,
            acct_no: self.acct_no.clone(),
            bank_name: self.bank_name.clone(),
            account_name: self.account_name.clone(),
        }
    }
    // payment may only be taken into an active account serving the order's location
    pub(crate) fn accepts_payment_for(&self, location_id: &str) -> Result<(), ValidationError> {
        if !self.is_active {
            return Err(ValidationError::InactiveBankAccount(self.id));
        }
        if !self.serves(location_id) {
            return Err(ValidationError::BankAccountLocation {
                account: self.id,
                location_id: location_id.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBankAccount {
    pub acct_no: String,
    pub bank_name: String,
    pub account_name: String,
    pub location_id: Option<String>,
}

/// Partial edit; unset fields are left unchanged.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BankAccountUpdate {
    pub acct_no: Option<String>,
    pub bank_name: Option<String>,
    pub account_name: Option<String>,
    pub location_id: Option<Option<String>>,
}

pub struct BankAccountDirectory {
    store: Arc<Store>,
}

impl BankAccountDirectory {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub fn create(&self, account: NewBankAccount) -> Result<BankAccount> {
        require("acct_no", &account.acct_no)?;
        require("bank_name", &account.bank_name)?;
        require("account_name", &account.account_name)?;

        let account = BankAccount {
            id: BankAccountId::new(),
            acct_no: account.acct_no,
            bank_name: account.bank_name,
            account_name: account.account_name,
            location_id: account.location_id,
            is_active: true,
            updated_at: TimeStamp::new(),
        };
        self.put(&account)?;
        info!(account = %account.id, "bank account created");

        Ok(account)
    }

    pub fn get(&self, id: BankAccountId) -> Result<BankAccount> {
        store::load(&self.store.bank_accounts, id.as_bytes())?
            .ok_or(Error::NotFound(Entity::BankAccount(id)))
    }

    #[instrument(skip(self))]
    pub fn update(&self, id: BankAccountId, update: BankAccountUpdate) -> Result<BankAccount> {
        for (field, value) in [
            ("acct_no", &update.acct_no),
            ("bank_name", &update.bank_name),
            ("account_name", &update.account_name),
        ] {
            if let Some(value) = value {
                require(field, value)?;
            }
        }

        let account = self.edit(id, |account| {
            if let Some(acct_no) = &update.acct_no {
                account.acct_no = acct_no.clone();
            }
            if let Some(bank_name) = &update.bank_name {
                account.bank_name = bank_name.clone();
            }
            if let Some(account_name) = &update.account_name {
                account.account_name = account_name.clone();
            }
            if let Some(location_id) = &update.location_id {
                account.location_id = location_id.clone();
            }
        })?;
        info!(account = %id, "bank account updated");

        Ok(account)
    }

    #[instrument(skip(self))]
    pub fn set_active(&self, id: BankAccountId, is_active: bool) -> Result<BankAccount> {
        let account = self.edit(id, |account| account.is_active = is_active)?;
        info!(account = %id, is_active, "bank account activation changed");

        Ok(account)
    }

    /// General accounts plus those scoped to `location_id`.
    pub fn for_location(&self, location_id: &str, include_inactive: bool) -> Result<Vec<BankAccount>> {
        let mut accounts = vec![];
        for entry in self.store.bank_accounts.iter() {
            let (_, bytes) = entry?;
            let account: BankAccount = store::decode(&bytes)?;
            if account.serves(location_id) && (include_inactive || account.is_active) {
                accounts.push(account);
            }
        }
        Ok(accounts)
    }

    // read-modify-write in one transaction
    fn edit(&self, id: BankAccountId, apply: impl Fn(&mut BankAccount)) -> Result<BankAccount> {
        let account = self.store.bank_accounts.transaction(|accounts| {
            let Some(mut account) = store::tx_load::<BankAccount>(accounts, id.as_bytes())? else {
                return store::abort(Error::NotFound(Entity::BankAccount(id)));
            };
            apply(&mut account);
            account.updated_at = TimeStamp::new();
            store::tx_store(accounts, id.as_bytes(), &account)?;
            Ok(account)
        })?;

        Ok(account)
    }

    fn put(&self, account: &BankAccount) -> Result<()> {
        self.store
            .bank_accounts
            .insert(account.id.as_bytes(), store::encode(account)?)?;
        Ok(())
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}
