pub mod postgres;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

use taskloop_errors::SchedulerResult;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// 创建数据库连接池
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    connect_timeout: Duration,
) -> SchedulerResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect(database_url)
        .await?;

    info!("数据库连接池就绪 (max_connections: {})", max_connections);
    Ok(pool)
}
