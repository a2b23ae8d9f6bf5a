//! sled storage: named trees, CBOR codec helpers and transaction plumbing.
use super::config::StorageSettings;
use super::error::{Error, Result};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Db, Tree};
use std::sync::Arc;
use tracing::info;

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, Error>;

pub struct Store {
    db: Arc<Db>,
    pub(crate) orders: Tree,
    pub(crate) pfis: Tree,
    pub(crate) active_pfis: Tree, // location/product -> active pfi id
    pub(crate) pfi_orders: Tree, // pfi id ++ order id -> ()
    pub(crate) audit: Tree, // event id -> event
    pub(crate) audit_by_order: Tree, // order id ++ event id -> event digest
    pub(crate) bank_accounts: Tree,
}

impl Store {
    pub fn new(db: Arc<Db>) -> Result<Self> {
        Ok(Self {
            orders: db.open_tree("orders")?,
            pfis: db.open_tree("pfis")?,
            active_pfis: db.open_tree("active_pfis")?,
            pfi_orders: db.open_tree("pfi_orders")?,
            audit: db.open_tree("audit")?,
            audit_by_order: db.open_tree("audit_by_order")?,
            bank_accounts: db.open_tree("bank_accounts")?,
            db,
        })
    }

    pub fn open(settings: &StorageSettings) -> Result<Self> {
        let mut config = sled::Config::new()
            .cache_capacity(settings.cache_capacity_bytes)
            .temporary(settings.temporary);
        // a temporary store gets a generated path
        if !settings.temporary {
            config = config.path(&settings.path);
        }
        if settings.flush_every_ms > 0 {
            config = config.flush_every_ms(Some(settings.flush_every_ms));
        }
        let db = config.open()?;
        info!(path = %settings.path.display(), temporary = settings.temporary, "opened store");

        Self::new(Arc::new(db))
    }

    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    Ok(minicbor::to_vec(value)?)
}

pub(crate) fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T> {
    Ok(minicbor::decode(bytes)?)
}

pub(crate) fn load<T: for<'b> minicbor::Decode<'b, ()>>(tree: &Tree, key: &[u8]) -> Result<Option<T>> {
    tree.get(key)?.map(|bytes| decode(&bytes)).transpose()
}

pub(crate) fn abort<T, E: Into<Error>>(err: E) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

pub(crate) fn tx_load<T: for<'b> minicbor::Decode<'b, ()>>(
    tree: &TransactionalTree,
    key: &[u8],
) -> TxResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => decode(&bytes).map(Some).or_else(abort),
        None => Ok(None),
    }
}

pub(crate) fn tx_store<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: &[u8],
    value: &T,
) -> TxResult<()> {
    let bytes = encode(value).or_else(abort)?;
    tree.insert(key, bytes)?;
    Ok(())
}

pub(crate) fn compound_key(a: &[u8; 16], b: &[u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(a);
    key.extend_from_slice(b);
    key
}

pub(crate) fn trailing_id(key: &[u8]) -> Option<[u8; 16]> {
    key.get(16..32)?.try_into().ok()
}

pub(crate) fn id_from(bytes: &[u8]) -> Result<[u8; 16]> {
    bytes
        .try_into()
        .map_err(|_| Error::Encoding(format!("expected a 16 byte id, found {} bytes", bytes.len())))
}
