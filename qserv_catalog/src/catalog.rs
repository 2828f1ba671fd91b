//! The persistent-store seam: everything the super-transaction manager, the per-worker ingest
//! request manager, and the fan-out jobs need to read and write durable catalog state, behind
//! one async trait. [`MemCatalog`] is the in-memory implementation every test in this workspace
//! runs against, exactly the role `iox_catalog`'s in-memory `Catalog` plays for the teacher.

use data_types::{DatabaseInfo, ReplicaInfo, TransactionContribInfo, TransactionId, TransactionInfo, TransactionState};
use snafu::OptionExt;
use std::collections::BTreeMap;

/// Errors the catalog store can fail a lookup or write with.
#[derive(Debug, snafu::Snafu, PartialEq, Eq)]
pub enum CatalogError {
    /// No database by that name.
    #[snafu(display("database not found: {name}"))]
    DatabaseNotFound {
        /// The name that was looked up.
        name: String,
    },
    /// No transaction by that id.
    #[snafu(display("transaction not found: {id}"))]
    TransactionNotFound {
        /// The id that was looked up.
        id: TransactionId,
    },
    /// No contribution by that id.
    #[snafu(display("contribution not found: {id}"))]
    ContributionNotFound {
        /// The id that was looked up.
        id: u32,
    },
}

/// One (worker, database, chunk) replica key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplicaKey {
    /// The worker holding the replica.
    pub worker: String,
    /// The database the chunk belongs to.
    pub database: String,
    /// The chunk number.
    pub chunk: u32,
}

/// The durable catalog: database/table descriptors, super-transactions, contribution records,
/// and replica placement.
#[async_trait::async_trait]
pub trait Catalog: std::fmt::Debug + Send + Sync {
    /// Fetches a database descriptor by name.
    async fn get_database(&self, name: &str) -> Result<DatabaseInfo, CatalogError>;
    /// Inserts or replaces a database descriptor.
    async fn put_database(&self, db: DatabaseInfo) -> Result<(), CatalogError>;

    /// Allocates the next transaction id for `database` (monotonic within the database).
    async fn next_transaction_id(&self, database: &str) -> u32;
    /// Inserts or replaces a transaction record.
    async fn put_transaction(&self, txn: TransactionInfo) -> Result<(), CatalogError>;
    /// Fetches a transaction record by id.
    async fn get_transaction(&self, id: TransactionId) -> Result<TransactionInfo, CatalogError>;
    /// All transactions currently in `state`, used by crash recovery at worker startup.
    async fn transactions_in_state(&self, state: TransactionState) -> Vec<TransactionInfo>;

    /// Allocates the next contribution id (unique across the whole catalog).
    async fn next_contribution_id(&self) -> u32;
    /// Inserts or replaces a contribution record.
    async fn put_contribution(&self, c: TransactionContribInfo) -> Result<(), CatalogError>;
    /// Fetches a contribution record by id.
    async fn get_contribution(&self, id: u32) -> Result<TransactionContribInfo, CatalogError>;
    /// All contributions belonging to a transaction.
    async fn contributions_for_transaction(&self, id: TransactionId) -> Vec<TransactionContribInfo>;

    /// Records that a replica of `key.chunk` exists on `key.worker`, sized `info.size_bytes`.
    async fn put_replica(&self, key: ReplicaKey, info: ReplicaInfo);
    /// Drops the replica record for `key`, if any.
    async fn drop_replica(&self, key: &ReplicaKey);
    /// All replica keys recorded for `database` on `worker`.
    async fn replicas_for_worker(&self, worker: &str, database: &str) -> Vec<ReplicaKey>;
}

/// An in-memory [`Catalog`], guarded by a single async mutex — adequate for a per-process
/// coordinator/worker and for tests; a real deployment would swap this for a MySQL-backed store
/// without changing any caller.
#[derive(Debug, Default)]
pub struct MemCatalog {
    state: tokio::sync::Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    databases: BTreeMap<String, DatabaseInfo>,
    transactions: BTreeMap<TransactionId, TransactionInfo>,
    next_transaction_id: BTreeMap<String, u32>,
    contributions: BTreeMap<u32, TransactionContribInfo>,
    next_contribution_id: u32,
    replicas: BTreeMap<ReplicaKey, ReplicaInfo>,
}

impl MemCatalog {
    /// An empty in-memory catalog.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Catalog for MemCatalog {
    async fn get_database(&self, name: &str) -> Result<DatabaseInfo, CatalogError> {
        self.state
            .lock()
            .await
            .databases
            .get(name)
            .cloned()
            .context(DatabaseNotFoundSnafu { name })
    }

    async fn put_database(&self, db: DatabaseInfo) -> Result<(), CatalogError> {
        self.state.lock().await.databases.insert(db.name.clone(), db);
        Ok(())
    }

    async fn next_transaction_id(&self, database: &str) -> u32 {
        let mut state = self.state.lock().await;
        let next = state.next_transaction_id.entry(database.to_string()).or_insert(0);
        let id = *next;
        *next += 1;
        id
    }

    async fn put_transaction(&self, txn: TransactionInfo) -> Result<(), CatalogError> {
        self.state.lock().await.transactions.insert(txn.id, txn);
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<TransactionInfo, CatalogError> {
        self.state
            .lock()
            .await
            .transactions
            .get(&id)
            .cloned()
            .context(TransactionNotFoundSnafu { id })
    }

    async fn transactions_in_state(&self, state: TransactionState) -> Vec<TransactionInfo> {
        self.state
            .lock()
            .await
            .transactions
            .values()
            .filter(|t| t.state == state)
            .cloned()
            .collect()
    }

    async fn next_contribution_id(&self) -> u32 {
        let mut state = self.state.lock().await;
        let id = state.next_contribution_id;
        state.next_contribution_id += 1;
        id
    }

    async fn put_contribution(&self, c: TransactionContribInfo) -> Result<(), CatalogError> {
        self.state.lock().await.contributions.insert(c.id, c);
        Ok(())
    }

    async fn get_contribution(&self, id: u32) -> Result<TransactionContribInfo, CatalogError> {
        self.state
            .lock()
            .await
            .contributions
            .get(&id)
            .cloned()
            .context(ContributionNotFoundSnafu { id })
    }

    async fn contributions_for_transaction(&self, id: TransactionId) -> Vec<TransactionContribInfo> {
        self.state
            .lock()
            .await
            .contributions
            .values()
            .filter(|c| c.transaction_id == id)
            .cloned()
            .collect()
    }

    async fn put_replica(&self, key: ReplicaKey, info: ReplicaInfo) {
        self.state.lock().await.replicas.insert(key, info);
    }

    async fn drop_replica(&self, key: &ReplicaKey) {
        self.state.lock().await.replicas.remove(key);
    }

    async fn replicas_for_worker(&self, worker: &str, database: &str) -> Vec<ReplicaKey> {
        self.state
            .lock()
            .await
            .replicas
            .keys()
            .filter(|k| k.worker == worker && k.database == database)
            .cloned()
            .collect()
    }
}
