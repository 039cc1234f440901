//! 命令事务守卫（CommandTransaction）
//!
//! 持久化一条命令后得到的作用域资源，持有写入其终态的唯一权利：
//! - `commit(status)`：写入终态并消费守卫；
//! - `abort()`：等价于 `commit(failed)`；
//! - 未结算即被丢弃（错误传播、panic、任务取消）时，在当前 tokio 运行时上补写 `failed`。
//!
//! 同步路径由网关提交，异步路径由后台任务提交；守卫只能被消费一次，
//! 因此两条路径对同一命令互斥。
//!
use crate::command::{Command, CommandId, CommandStatus};
use crate::error::{GatewayError, GatewayResult as Result};
use crate::persist::CommandStore;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

pub struct CommandTransaction {
    store: Arc<dyn CommandStore>,
    command_id: CommandId,
    settled: bool,
}

impl CommandTransaction {
    /// 持久化命令、写入标识并打开事务
    pub async fn open(store: Arc<dyn CommandStore>, command: &mut Command) -> Result<Self> {
        if let Some(existing) = command.id() {
            return Err(GatewayError::command_rejected(format!(
                "command is already persisted as {existing}"
            )));
        }

        let command_id = store.persist(command).await?;
        command.assign_id(command_id)?;

        Ok(Self {
            store,
            command_id,
            settled: false,
        })
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    /// 写入终态；非终态会被拒绝，守卫随之按失败路径结算
    pub async fn commit(mut self, status: CommandStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(GatewayError::command_failed(format!(
                "transaction for command {} cannot settle to {status}",
                self.command_id
            )));
        }

        // 写入返回前被取消时，由 Drop 补写 `failed`
        let written = self.store.set_status(self.command_id, status).await;
        self.settled = true;
        written
    }

    pub async fn abort(self) -> Result<()> {
        self.commit(CommandStatus::Failed).await
    }
}

impl fmt::Debug for CommandTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTransaction")
            .field("command_id", &self.command_id)
            .field("settled", &self.settled)
            .finish()
    }
}

impl Drop for CommandTransaction {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let command_id = self.command_id;
        let Ok(handle) = Handle::try_current() else {
            tracing::error!(
                %command_id,
                "transaction dropped outside a runtime; status left pending"
            );
            return;
        };

        tracing::warn!(%command_id, "transaction dropped before settling; recording failure");
        let store = self.store.clone();
        handle.spawn(async move {
            if let Err(err) = store.set_status(command_id, CommandStatus::Failed).await {
                tracing::error!(%command_id, error = %err, "failed to record aborted command");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::InMemoryCommandStore;
    use std::time::Duration;

    fn command() -> Command {
        Command::builder()
            .command_type("echo")
            .issuer("1")
            .authenticated_by("1")
            .host("localhost")
            .build()
    }

    #[tokio::test]
    async fn open_assigns_id_and_leaves_pending() {
        let store = Arc::new(InMemoryCommandStore::new());
        let mut cmd = command();

        let tx = CommandTransaction::open(store.clone(), &mut cmd).await.unwrap();
        assert_eq!(cmd.id(), Some(tx.command_id()));
        assert_eq!(store.status_of(tx.command_id()), Some(CommandStatus::Pending));

        tx.commit(CommandStatus::Done).await.unwrap();
        assert_eq!(store.status_of(cmd.id().unwrap()), Some(CommandStatus::Done));
    }

    #[tokio::test]
    async fn reopening_a_persisted_command_is_refused() {
        let store = Arc::new(InMemoryCommandStore::new());
        let mut cmd = command();

        let tx = CommandTransaction::open(store.clone(), &mut cmd).await.unwrap();
        let err = CommandTransaction::open(store.clone(), &mut cmd)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CommandRejected { .. }));
        assert_eq!(store.len(), 1);

        tx.abort().await.unwrap();
        assert_eq!(store.status_of(cmd.id().unwrap()), Some(CommandStatus::Failed));
    }

    #[tokio::test]
    async fn commit_rejects_pending() {
        let store = Arc::new(InMemoryCommandStore::new());
        let mut cmd = command();
        let tx = CommandTransaction::open(store.clone(), &mut cmd).await.unwrap();
        let id = tx.command_id();

        let err = tx.commit(CommandStatus::Pending).await.unwrap_err();
        assert!(matches!(err, GatewayError::CommandFailed { .. }));

        // 拒绝后守卫按失败路径结算
        wait_for(&store, id, CommandStatus::Failed).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropping_an_open_transaction_records_failure() {
        let store = Arc::new(InMemoryCommandStore::new());
        let mut cmd = command();

        let id = {
            let tx = CommandTransaction::open(store.clone(), &mut cmd).await.unwrap();
            tx.command_id()
        };

        wait_for(&store, id, CommandStatus::Failed).await;
    }

    /// `done` 写入永不返回的存储
    struct StalledStore {
        inner: InMemoryCommandStore,
    }

    #[async_trait::async_trait]
    impl CommandStore for StalledStore {
        async fn persist(&self, command: &Command) -> Result<CommandId> {
            self.inner.persist(command).await
        }

        async fn set_status(&self, id: CommandId, status: CommandStatus) -> Result<()> {
            if status == CommandStatus::Done {
                std::future::pending::<()>().await;
            }
            self.inner.set_status(id, status).await
        }

        async fn get_commands(
            &self,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<crate::command::CommandRecord>> {
            self.inner.get_commands(offset, limit).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn commit_cancelled_mid_write_records_failure() {
        let store = Arc::new(StalledStore {
            inner: InMemoryCommandStore::new(),
        });
        let mut cmd = command();
        let tx = CommandTransaction::open(store.clone(), &mut cmd).await.unwrap();
        let id = tx.command_id();

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), tx.commit(CommandStatus::Done)).await;
        assert!(outcome.is_err());

        wait_for(&store.inner, id, CommandStatus::Failed).await;
    }

    async fn wait_for(store: &InMemoryCommandStore, id: CommandId, expected: CommandStatus) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.status_of(id) != Some(expected) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("status was not recorded in time");
    }
}
