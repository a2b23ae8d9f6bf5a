//! One handle over every service, sharing a single store.
use super::audit::AuditLog;
use super::bank::BankAccountDirectory;
use super::config::{PagingSettings, Settings, StorageSettings};
use super::error::Result;
use super::ledger::PfiLedger;
use super::service::OrderService;
use super::store::Store;
use std::sync::Arc;
use tracing::info;

pub struct FuelOps {
    pub orders: OrderService,
    pub pfis: Arc<PfiLedger>,
    pub audit: AuditLog,
    pub bank_accounts: BankAccountDirectory,
    store: Arc<Store>,
}

impl FuelOps {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let store = Store::open(&settings.storage)?;
        Ok(Self::assemble(store, &settings.paging))
    }

    pub fn open(settings: &StorageSettings) -> Result<Self> {
        Ok(Self::assemble(Store::open(settings)?, &PagingSettings::default()))
    }

    pub fn with_db(db: Arc<sled::Db>) -> Result<Self> {
        Ok(Self::assemble(Store::new(db)?, &PagingSettings::default()))
    }

    pub fn flush(&self) -> Result<usize> {
        self.store.flush()
    }

    fn assemble(store: Store, paging: &PagingSettings) -> Self {
        let store = Arc::new(store);
        let pfis = Arc::new(
            PfiLedger::new(Arc::clone(&store)).with_paging(paging.clone()),
        );
        info!(
            default_page_size = paging.default_page_size,
            max_page_size = paging.max_page_size,
            "fuel ops ready"
        );

        Self {
            orders: OrderService::new(Arc::clone(&store), Arc::clone(&pfis))
                .with_paging(paging.clone()),
            pfis,
            audit: AuditLog::new(Arc::clone(&store)).with_paging(paging.clone()),
            bank_accounts: BankAccountDirectory::new(Arc::clone(&store)),
            store,
        }
    }
}
