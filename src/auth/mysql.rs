//! SQL-backed plugin: a row in `MYSQL_TABLE` keyed by `device_key` grants
//! admission. Connection/query failures surface as `Err` from this plugin;
//! the core downgrades them to refused admission and logs the error
//! (spec §4.1).

use anyhow::Context;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

use super::AuthPlugin;

pub struct MysqlPlugin {
    pool: MySqlPool,
    table: String,
}

impl MysqlPlugin {
    pub async fn init(
        connection_url: Option<&str>,
        table: Option<&str>,
    ) -> anyhow::Result<Self> {
        let connection_url = connection_url
            .context("MYSQL_CONNECTION_URL is required for the mysql auth plugin")?;
        let table = table
            .context("MYSQL_TABLE is required for the mysql auth plugin")?
            .to_string();

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(connection_url)
            .await
            .context("failed to connect to MYSQL_CONNECTION_URL")?;

        Ok(Self { pool, table })
    }
}

impl AuthPlugin for MysqlPlugin {
    async fn validate_key(&self, device_key: &str) -> anyhow::Result<bool> {
        let query = format!(
            "SELECT 1 FROM {} WHERE device_key = ? LIMIT 1",
            self.table
        );
        let row: Option<(i32,)> = sqlx::query_as(&query)
            .bind(device_key)
            .fetch_optional(&self.pool)
            .await
            .context("mysql auth plugin query failed")?;
        Ok(row.is_some())
    }
}
