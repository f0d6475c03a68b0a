use std::sync::Arc;

use bb8_postgres::bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use tokio_postgres::NoTls;

use crate::catalog::MediaCatalog;
use crate::config::Config;
use crate::reconcile::ReconciliationEngine;
use crate::upload_store::UploadStore;

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

pub struct AppState {
    pub catalog: Arc<MediaCatalog>,
    pub reconciler: ReconciliationEngine,
    pub uploads: UploadStore,
    pub file_base_url: String,
    pub max_upload_file_size: usize,
    pub max_upload_files: usize,
}

pub async fn establish_pool_connection(
    config: &Config,
) -> Result<PgPool, Box<dyn std::error::Error + Send + Sync + 'static>> {
    let conn_manager =
        PostgresConnectionManager::new_from_stringlike(config.database_url.as_str(), NoTls)?;

    let pool = Pool::builder()
        .min_idle(Some(1))
        .max_size(config.db_pool_max_size.max(1))
        .build(conn_manager)
        .await?;
    Ok(pool)
}
