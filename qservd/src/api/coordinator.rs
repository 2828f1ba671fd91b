//! Coordinator-side request handlers (§6): begin/end a super-transaction and read back its
//! record. Every mutating handler checks the bearer key first.

use super::{check_admin_auth, ApiError};
use data_types::{TransactionContribInfo, TransactionId, TransactionInfo};
use qserv_catalog::{Catalog, TransactionManager};
use serde_json::Value as Json;
use snafu::ResultExt;
use std::sync::Arc;

/// Shared coordinator-side service context, built once at startup and handed to every handler.
#[derive(Debug)]
pub struct CoordinatorContext {
    /// The durable catalog store.
    pub catalog: Arc<dyn Catalog>,
    /// The super-transaction manager.
    pub transaction_manager: Arc<TransactionManager>,
    /// The administrative bearer key every mutating endpoint checks against.
    pub admin_auth_key: String,
}

/// `POST /ingest/trans` — begins a new super-transaction on `database`.
pub async fn begin_transaction(
    ctx: &CoordinatorContext,
    auth_key: &str,
    database: &str,
    context: Option<Json>,
) -> Result<TransactionInfo, ApiError> {
    check_admin_auth(auth_key, &ctx.admin_auth_key)?;
    ctx.transaction_manager
        .begin(database, context)
        .await
        .context(super::TransactionSnafu)
}

/// `PUT /ingest/trans/:id?abort={0|1}` — ends (commits or aborts) a super-transaction.
pub async fn end_transaction(
    ctx: &CoordinatorContext,
    auth_key: &str,
    id: TransactionId,
    abort: bool,
) -> Result<TransactionInfo, ApiError> {
    check_admin_auth(auth_key, &ctx.admin_auth_key)?;
    ctx.transaction_manager.end(id, abort).await.context(super::TransactionSnafu)
}

/// `GET /ingest/trans/:id?contrib=1` — reads back a transaction record, optionally with its
/// contributions.
pub async fn get_transaction(
    ctx: &CoordinatorContext,
    id: TransactionId,
    include_contrib: bool,
) -> Result<(TransactionInfo, Vec<TransactionContribInfo>), ApiError> {
    let txn = ctx.catalog.get_transaction(id).await.context(super::CatalogSnafu)?;
    let contribs = if include_contrib {
        ctx.catalog.contributions_for_transaction(id).await
    } else {
        Vec::new()
    };
    Ok((txn, contribs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{DatabaseInfo, TransactionState};
    use qserv_catalog::{AbortJobRunner, DirectorIndexJobRunner, JobError, MemCatalog, MockMysqlConn};
    use qserv_time::MockProvider;

    #[derive(Debug, Default)]
    struct NoopAbort;

    #[async_trait::async_trait]
    impl AbortJobRunner for NoopAbort {
        async fn run(&self, _transaction_id: TransactionId) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct NoopDirectorIndex;

    #[async_trait::async_trait]
    impl DirectorIndexJobRunner for NoopDirectorIndex {
        async fn run(&self, _database: &str, _table: &str, _id: TransactionId) -> Result<(), JobError> {
            Ok(())
        }
    }

    async fn setup() -> CoordinatorContext {
        let catalog: Arc<dyn Catalog> = Arc::new(MemCatalog::new());
        catalog.put_database(DatabaseInfo::new("db", "family1")).await.unwrap();
        let manager = TransactionManager::new(
            catalog.clone(),
            Arc::new(MockMysqlConn::new()),
            Arc::new(MockProvider::new(1)),
            Arc::new(NoopAbort),
            Arc::new(NoopDirectorIndex),
        );
        CoordinatorContext {
            catalog,
            transaction_manager: Arc::new(manager),
            admin_auth_key: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn begin_rejects_a_missing_auth_key() {
        let ctx = setup().await;
        let err = begin_transaction(&ctx, "wrong", "db", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn begin_then_get_round_trips_the_transaction() {
        let ctx = setup().await;
        let txn = begin_transaction(&ctx, "secret", "db", None).await.unwrap();
        assert_eq!(txn.state, TransactionState::Started);

        let (fetched, contribs) = get_transaction(&ctx, txn.id, true).await.unwrap();
        assert_eq!(fetched.id, txn.id);
        assert!(contribs.is_empty());
    }

    #[tokio::test]
    async fn end_commits_the_transaction() {
        let ctx = setup().await;
        let txn = begin_transaction(&ctx, "secret", "db", None).await.unwrap();
        let ended = end_transaction(&ctx, "secret", txn.id, false).await.unwrap();
        assert_eq!(ended.state, TransactionState::Finished);
    }
}
