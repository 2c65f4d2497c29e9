//! Durable request ledger: last accepted claim per address, plus the
//! distribution history used for statistics.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokengate_common::types::{Address, TxHash};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Corrupt ledger entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Last accepted faucet claim for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRecord {
    pub address: Address,
    /// Epoch milliseconds
    pub last_claim_at: i64,
}

/// Distribution record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRecord {
    /// Recipient address
    pub address: Address,
    /// Amount dispensed (minor units)
    pub amount: String,
    /// Transaction hash
    pub tx_hash: TxHash,
    /// Epoch milliseconds of the claim decision
    pub timestamp: i64,
}

impl DistributionRecord {
    pub fn new(address: Address, amount: u128, tx_hash: TxHash, timestamp: i64) -> Self {
        Self {
            address,
            amount: amount.to_string(),
            tx_hash,
            timestamp,
        }
    }

    fn key(&self) -> String {
        // Zero-padded so a prefix scan yields one address's history in time order
        format!("{}:{:020}:{}", self.address, self.timestamp, self.tx_hash)
    }
}

/// Ledger statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStatistics {
    pub total_distributions: usize,
    pub total_dispensed: String,
    pub unique_addresses: usize,
}

/// Sled-backed ledger. Each claim is its own key, so writes for unrelated
/// addresses never rewrite each other's state.
pub struct ClaimLedger {
    db: Db,
    /// address -> last claim timestamp (i64, big-endian)
    claims: Tree,
    /// "address:timestamp:tx_hash" -> bincode DistributionRecord
    distributions: Tree,
}

impl ClaimLedger {
    /// Create or open the ledger at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        info!("Opening request ledger at: {}", path.as_ref().display());

        let db = sled::Config::default().path(path).open()?;
        Self::from_db(db)
    }

    /// In-memory ledger that is discarded on drop.
    pub fn temporary() -> LedgerResult<Self> {
        let db = sled::Config::default().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> LedgerResult<Self> {
        let claims = db.open_tree("claims")?;
        let distributions = db.open_tree("distributions")?;
        Ok(Self {
            db,
            claims,
            distributions,
        })
    }

    /// Last accepted claim timestamp for `address`
    pub fn get(&self, address: &Address) -> LedgerResult<Option<i64>> {
        let key = address.to_string();
        match self.claims.get(key.as_bytes())? {
            Some(bytes) => decode_timestamp(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Overwrites the claim timestamp; returns only once the write is on disk.
    pub async fn set(&self, address: &Address, timestamp: i64) -> LedgerResult<()> {
        let key = address.to_string();
        self.claims.insert(key.as_bytes(), &timestamp.to_be_bytes()[..])?;
        self.db.flush_async().await?;

        debug!(address = %address, timestamp, "Ledger entry persisted");
        Ok(())
    }

    /// Appends to the distribution history
    pub async fn record_distribution(&self, record: &DistributionRecord) -> LedgerResult<()> {
        let value = bincode::serialize(record).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        self.distributions.insert(record.key().as_bytes(), value)?;
        self.db.flush_async().await?;

        debug!("Recorded distribution for address: {}", record.address);
        Ok(())
    }

    /// Every claim record, ordered by address
    pub fn records(&self) -> LedgerResult<Vec<ClaimRecord>> {
        let mut records = Vec::with_capacity(self.claims.len());

        for item in self.claims.iter() {
            let (key, value) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();
            let address = key.parse::<Address>().map_err(|e| LedgerError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            let last_claim_at = decode_timestamp(&key, &value)?;
            records.push(ClaimRecord {
                address,
                last_claim_at,
            });
        }

        Ok(records)
    }

    /// Distribution history for one address, newest first
    pub fn distributions_for(&self, address: &Address) -> LedgerResult<Vec<DistributionRecord>> {
        let mut records = Vec::new();

        for item in self.distributions.scan_prefix(format!("{}:", address)) {
            let (_, value) = item?;
            records.push(decode_distribution(&value)?);
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Get statistics
    pub fn statistics(&self) -> LedgerResult<LedgerStatistics> {
        let mut total_amount = 0u128;

        for item in self.distributions.iter() {
            let (_, value) = item?;
            let record = decode_distribution(&value)?;
            total_amount = total_amount.saturating_add(record.amount.parse::<u128>().unwrap_or(0));
        }

        Ok(LedgerStatistics {
            total_distributions: self.distributions.len(),
            total_dispensed: total_amount.to_string(),
            unique_addresses: self.claims.len(),
        })
    }

    /// Drops distribution history older than `days`. Claim records are kept.
    pub async fn prune_distributions(&self, days: i64, now_millis: i64) -> LedgerResult<usize> {
        let cutoff = now_millis - days * MILLIS_PER_DAY;
        let mut keys_to_remove = Vec::new();

        for item in self.distributions.iter() {
            let (key, value) = item?;
            if decode_distribution(&value)?.timestamp < cutoff {
                keys_to_remove.push(key);
            }
        }

        for key in &keys_to_remove {
            self.distributions.remove(key)?;
        }
        self.db.flush_async().await?;

        info!("Pruned {} distribution records (older than {} days)", keys_to_remove.len(), days);
        Ok(keys_to_remove.len())
    }
}

fn decode_timestamp(key: &str, bytes: &[u8]) -> LedgerResult<i64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| LedgerError::Corrupt {
        key: key.to_string(),
        reason: format!("expected 8-byte timestamp, found {} bytes", bytes.len()),
    })?;
    Ok(i64::from_be_bytes(raw))
}

fn decode_distribution(bytes: &[u8]) -> LedgerResult<DistributionRecord> {
    bincode::deserialize(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
}

/// Per-address critical sections. Claims for one address serialize; other
/// addresses never contend.
#[derive(Default)]
pub struct AddressLocks {
    locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, address: &Address) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard guard is released before awaiting
        let mutex = self.locks.entry(*address).or_default().value().clone();
        mutex.lock_owned().await
    }

    /// Forgets locks nobody holds or waits on.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
