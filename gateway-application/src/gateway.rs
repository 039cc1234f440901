//! 命令网关：校验、持久化、执行并返回结果的唯一入口
//!
use crate::dto::ExecutionResult;
use crate::query::CommandQuery;
use crate::registry::HandlerRegistry;
use crate::runner::{CommandRunner, Settlement};
use bon::bon;
use gateway_domain::command::{Command, CommandRecord, CommandStatus};
use gateway_domain::error::{GatewayError, GatewayResult};
use gateway_domain::persist::CommandStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const READ_ONLY_REASON: &str = "The system is in read-only mode.";

pub struct Gateway {
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn CommandStore>,
    runner: CommandRunner,
    read_only: AtomicBool,
}

#[bon]
impl Gateway {
    #[builder]
    pub fn new(
        registry: HandlerRegistry,
        store: Arc<dyn CommandStore>,
        runner: CommandRunner,
        #[builder(default)] read_only: bool,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            runner,
            read_only: AtomicBool::new(read_only),
        }
    }
}

impl Gateway {
    /// 提交一条命令
    ///
    /// 只读模式、校验失败、授权失败与异步队列拒绝都不会产生持久化记录；
    /// 同步命令在返回前写入终态，异步命令返回时仍为 `pending`。
    pub async fn issue(&self, command: Command) -> GatewayResult<ExecutionResult> {
        if self.is_read_only() {
            tracing::debug!(command_type = command.command_type(), "rejected in read-only mode");
            return Err(GatewayError::read_only_mode(READ_ONLY_REASON));
        }

        let mut validated = self.registry.validate(command).inspect_err(|err| {
            tracing::info!(error = %err, "command rejected");
        })?;
        validated.authorize()?;
        let reservation = self.runner.reserve(validated.command()).await?;

        let transaction = validated.persist(self.store.clone()).await?;
        let command_id = transaction.command_id();
        let command_type = validated.command_type();
        tracing::debug!(%command_id, command_type, "command persisted");

        let execution = self
            .runner
            .execute(reservation, validated, transaction)
            .await
            .inspect_err(|err| {
                tracing::warn!(%command_id, command_type, error = %err, "command not completed");
            })?;

        let done = execution.is_done();
        let (output, settlement) = execution.into_parts();
        match settlement {
            Settlement::Inline(transaction) => transaction.commit(CommandStatus::Done).await?,
            Settlement::Deferred => {
                tracing::debug!(%command_id, command_type, "command queued");
            }
        }

        Ok(ExecutionResult::new(command_id, output, done))
    }

    /// 审计列表：按命令标识倒序分页
    pub async fn get_commands(&self, query: CommandQuery) -> GatewayResult<Vec<CommandRecord>> {
        self.store.get_commands(query.offset, query.limit).await
    }

    pub fn set_read_only(&self, read_only: bool) {
        let previous = self.read_only.swap(read_only, Ordering::SeqCst);
        if previous != read_only {
            tracing::info!(read_only, "read-only mode changed");
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_handler::{CommandHandler, HandlerOutput, NoParams};
    use crate::config::RunnerConfig;
    use crate::schema::ParamSchema;
    use async_trait::async_trait;
    use gateway_domain::error::{DEFAULT_REASON, ErrorKind};
    use gateway_domain::persist::InMemoryCommandStore;

    struct AdminOnly;

    #[async_trait]
    impl CommandHandler for AdminOnly {
        const COMMAND_TYPE: &'static str = "admin.reset";
        type Params = NoParams;

        fn schema(&self) -> ParamSchema {
            ParamSchema::new()
        }

        fn authorize(&self, command: &Command) -> GatewayResult<()> {
            if command.issuer() == "root" {
                Ok(())
            } else {
                Err(GatewayError::new(ErrorKind::NotAuthorized, None))
            }
        }

        async fn run(&self, _command: &Command, _params: NoParams) -> anyhow::Result<HandlerOutput> {
            Ok(HandlerOutput::created("reset-1"))
        }
    }

    fn command(issuer: &str) -> Command {
        Command::builder()
            .command_type("admin.reset")
            .issuer(issuer)
            .authenticated_by(issuer)
            .host("localhost")
            .build()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn authorization_runs_before_persistence() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(AdminOnly)).unwrap();
        let store = Arc::new(InMemoryCommandStore::new());
        let (runner, _workers) = CommandRunner::start(RunnerConfig::default());
        let gateway = Gateway::builder()
            .registry(registry)
            .store(store.clone())
            .runner(runner)
            .build();

        let err = gateway.issue(command("guest")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAuthorized);
        assert_eq!(err.reason(), DEFAULT_REASON);
        assert!(store.is_empty());

        let res = gateway.issue(command("root")).await.unwrap();
        assert!(res.done);
        assert!(res.created);
        assert_eq!(res.ident.as_deref(), Some("reset-1"));
        assert_eq!(store.status_of(res.command_id), Some(CommandStatus::Done));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn read_only_toggle_is_observed() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(AdminOnly)).unwrap();
        let store = Arc::new(InMemoryCommandStore::new());
        let (runner, _workers) = CommandRunner::start(RunnerConfig::default());
        let gateway = Gateway::builder()
            .registry(registry)
            .store(store.clone())
            .runner(runner)
            .read_only(true)
            .build();

        let err = gateway.issue(command("root")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnlyMode);
        assert!(store.is_empty());

        gateway.set_read_only(false);
        assert!(!gateway.is_read_only());
        gateway.issue(command("root")).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
