//! SQLite 命令存储（需启用 `sqlite` 特性）
//!
//! 单表 `commands`，以自增主键作为命令标识，状态列默认 `pending`。
//!
use crate::command::{Command, CommandId, CommandRecord, CommandStatus, Params};
use crate::error::{GatewayError, GatewayResult as Result};
use crate::persist::CommandStore;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::str::FromStr;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commands (
    command_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    command_type     TEXT    NOT NULL,
    timestamp        INTEGER NOT NULL,
    issuer           TEXT    NOT NULL,
    authenticated_by TEXT    NOT NULL,
    host             TEXT    NOT NULL,
    params           TEXT    NOT NULL,
    status           TEXT    NOT NULL DEFAULT 'pending'
)
"#;

#[derive(Debug, Clone)]
pub struct SqliteCommandStore {
    pool: SqlitePool,
}

impl SqliteCommandStore {
    /// 连接数据库（不存在则创建）并确保表结构存在
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // 内存库按连接隔离，只能使用单连接
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CommandStore for SqliteCommandStore {
    async fn persist(&self, command: &Command) -> Result<CommandId> {
        let params = serde_json::to_string(command.params())?;
        let result = sqlx::query(
            "INSERT INTO commands \
             (command_type, timestamp, issuer, authenticated_by, host, params, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(command.command_type())
        .bind(command.submitted_at().timestamp_millis())
        .bind(command.issuer())
        .bind(command.authenticated_by())
        .bind(command.host())
        .bind(params)
        .bind(CommandStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(CommandId::new(result.last_insert_rowid()))
    }

    async fn set_status(&self, command_id: CommandId, status: CommandStatus) -> Result<()> {
        let result = sqlx::query("UPDATE commands SET status = ? WHERE command_id = ?")
            .bind(status.as_str())
            .bind(command_id.value())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::upstream_failure(format!(
                "no such command: {command_id}"
            )));
        }
        Ok(())
    }

    async fn get_commands(&self, offset: usize, limit: usize) -> Result<Vec<CommandRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT command_id, command_type, timestamp, issuer, authenticated_by, host, params, status \
             FROM commands ORDER BY command_id DESC LIMIT ? OFFSET ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<CommandRecord> {
    let params: String = row.try_get("params")?;
    let params: Params = serde_json::from_str(&params)?;

    let millis: i64 = row.try_get("timestamp")?;
    let submitted_at = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        GatewayError::upstream_failure(format!("invalid command timestamp: {millis}"))
    })?;

    let status: String = row.try_get("status")?;

    Ok(CommandRecord {
        command_id: CommandId::new(row.try_get("command_id")?),
        command_type: row.try_get("command_type")?,
        params,
        issuer: row.try_get("issuer")?,
        authenticated_by: row.try_get("authenticated_by")?,
        host: row.try_get("host")?,
        submitted_at,
        status: status.parse()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(ty: &str) -> Command {
        Command::builder()
            .command_type(ty)
            .params(json!({"foo": 1, "bar": "x"}).as_object().cloned().unwrap())
            .issuer("7")
            .authenticated_by("8")
            .host("10.1.1.1")
            .build()
    }

    #[tokio::test]
    async fn persist_then_list_round_trip() {
        let store = SqliteCommandStore::connect("sqlite::memory:").await.unwrap();

        let first = store.persist(&command("a")).await.unwrap();
        let second = store.persist(&command("b")).await.unwrap();
        assert!(second > first);

        store.set_status(first, CommandStatus::Done).await.unwrap();
        store.set_status(first, CommandStatus::Done).await.unwrap();

        let page = store.get_commands(0, 10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].command_id, second);
        assert_eq!(page[0].status, CommandStatus::Pending);
        assert_eq!(page[1].command_id, first);
        assert_eq!(page[1].status, CommandStatus::Done);
        assert_eq!(page[1].command_type, "a");
        assert_eq!(page[1].params.get("foo"), Some(&json!(1)));
        assert_eq!(page[1].issuer, "7");
        assert_eq!(page[1].host, "10.1.1.1");
    }

    #[tokio::test]
    async fn pagination_edges() {
        let store = SqliteCommandStore::connect("sqlite::memory:").await.unwrap();
        for i in 0..3 {
            store.persist(&command(&format!("c{i}"))).await.unwrap();
        }

        assert!(store.get_commands(0, 0).await.unwrap().is_empty());
        assert!(store.get_commands(3, 5).await.unwrap().is_empty());
        assert_eq!(store.get_commands(1, 5).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_id_is_an_upstream_failure() {
        let store = SqliteCommandStore::connect("sqlite::memory:").await.unwrap();
        let err = store
            .set_status(CommandId::new(9), CommandStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamFailure { .. }));
    }
}
