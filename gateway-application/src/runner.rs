//! 命令执行器（CommandRunner）
//!
//! - 同步命令：在调用方任务上直接执行处理器，产出交由网关提交终态；
//! - 异步命令：持久化之前先预留队列槽位（`reserve`），持久化后连同事务守卫
//!   经槽位放入有界队列，由固定数量的工作任务执行并提交终态，调用方立即得到“已受理”；
//! - 处理器的任何错误或 panic 都在此边界转换为 `CommandFailed`，原因只记录日志。
//!
//! 已知限制：处理器执行既不能取消也没有超时。
//!
use crate::command_handler::HandlerOutput;
use crate::config::{Backpressure, RunnerConfig};
use crate::registry::ValidatedCommand;
use gateway_domain::command::{Command, CommandId, CommandStatus};
use gateway_domain::error::{GatewayError, GatewayResult};
use gateway_domain::persist::CommandTransaction;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const QUEUE_FULL: &str = "asynchronous command queue is full";
const SHUT_DOWN: &str = "asynchronous command runner is shut down";

/// 一次执行的结果
#[derive(Debug)]
pub struct Execution {
    command_id: CommandId,
    output: HandlerOutput,
    settlement: Settlement,
}

/// 终态写入权的归属
#[derive(Debug)]
pub enum Settlement {
    /// 同步路径：执行已结束，守卫交还调用方提交
    Inline(CommandTransaction),
    /// 异步路径：守卫已移交后台任务
    Deferred,
}

impl Execution {
    fn inline(output: HandlerOutput, transaction: CommandTransaction) -> Self {
        Self {
            command_id: transaction.command_id(),
            output,
            settlement: Settlement::Inline(transaction),
        }
    }

    fn deferred(command_id: CommandId) -> Self {
        Self {
            command_id,
            output: HandlerOutput::empty(),
            settlement: Settlement::Deferred,
        }
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    /// 执行是否在返回前完成
    pub fn is_done(&self) -> bool {
        matches!(self.settlement, Settlement::Inline(_))
    }

    pub fn output(&self) -> &HandlerOutput {
        &self.output
    }

    pub fn into_parts(self) -> (HandlerOutput, Settlement) {
        (self.output, self.settlement)
    }
}

/// 执行前预留的资源
///
/// 异步命令持有一个队列槽位；丢弃未使用的预留即归还槽位。
#[must_use = "dropping a reservation releases its queue slot"]
pub struct Reservation {
    slot: Option<mpsc::OwnedPermit<Job>>,
}

impl Reservation {
    /// 是否占用了异步队列槽位
    pub fn is_queued(&self) -> bool {
        self.slot.is_some()
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("queued", &self.is_queued())
            .finish()
    }
}

/// 后台执行单元：命令与其事务守卫一起移交
struct Job {
    command: ValidatedCommand,
    transaction: CommandTransaction,
}

impl Job {
    async fn complete(self, worker: usize) {
        let Job {
            command,
            transaction,
        } = self;
        let command_id = transaction.command_id();
        let command_type = command.command_type();

        let status = match command.run().await {
            Ok(_) => CommandStatus::Done,
            Err(cause) => {
                tracing::error!(
                    worker,
                    %command_id,
                    command_type,
                    error = %format!("{cause:#}"),
                    "caught fatal error while handling asynchronous command"
                );
                CommandStatus::Failed
            }
        };

        if let Err(err) = transaction.commit(status).await {
            tracing::error!(
                worker,
                %command_id,
                %status,
                error = %err,
                "failed to record asynchronous command status"
            );
        }
    }
}

#[derive(Clone)]
pub struct CommandRunner {
    queue: mpsc::Sender<Job>,
    backpressure: Backpressure,
    token: CancellationToken,
}

impl CommandRunner {
    /// 启动工作任务，返回执行器与用于关闭/等待的句柄（须在 tokio 运行时内调用）
    #[must_use = "dropping the WorkerHandle shuts the workers down"]
    pub fn start(config: RunnerConfig) -> (Self, WorkerHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let token = CancellationToken::new();

        let tasks = (0..config.workers.max(1))
            .map(|worker| tokio::spawn(Self::worker_loop(worker, rx.clone(), token.clone())))
            .collect();

        let runner = Self {
            queue: tx,
            backpressure: config.backpressure,
            token: token.clone(),
        };

        (runner, WorkerHandle { token, tasks })
    }

    /// 为命令预留执行资源，须在持久化之前调用
    ///
    /// 异步命令无法获得队列槽位（队列已满或执行器已关闭）时返回 `UpstreamFailure`，
    /// 此时尚未写入任何记录。`Wait` 策略下等待空闲槽位，期间关闭执行器同样返回错误。
    pub async fn reserve(&self, command: &Command) -> GatewayResult<Reservation> {
        if !command.is_asynchronous() {
            return Ok(Reservation { slot: None });
        }

        let slot = if self.token.is_cancelled() {
            Err(SHUT_DOWN)
        } else {
            match self.backpressure {
                Backpressure::Reject => {
                    self.queue
                        .clone()
                        .try_reserve_owned()
                        .map_err(|err| match err {
                            TrySendError::Full(_) => QUEUE_FULL,
                            TrySendError::Closed(_) => SHUT_DOWN,
                        })
                }
                Backpressure::Wait => {
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => Err(SHUT_DOWN),
                        permit = self.queue.clone().reserve_owned() => permit.map_err(|_| SHUT_DOWN),
                    }
                }
            }
        };

        match slot {
            Ok(permit) => Ok(Reservation { slot: Some(permit) }),
            Err(reason) => {
                tracing::warn!(
                    command_type = command.command_type(),
                    reason,
                    "asynchronous command not accepted"
                );
                Err(GatewayError::upstream_failure(reason))
            }
        }
    }

    /// 执行已持久化的命令
    ///
    /// 同步失败时守卫记录 `failed` 并返回 `CommandFailed`；
    /// 异步命令经预留的槽位入队，终态由工作任务提交。
    pub async fn execute(
        &self,
        reservation: Reservation,
        command: ValidatedCommand,
        transaction: CommandTransaction,
    ) -> GatewayResult<Execution> {
        let command_id = transaction.command_id();
        let command_type = command.command_type();

        match reservation.slot {
            Some(slot) => {
                debug_assert_eq!(command.command().id(), Some(command_id));
                let _ = slot.send(Job {
                    command,
                    transaction,
                });
                return Ok(Execution::deferred(command_id));
            }
            None if command.command().is_asynchronous() => {
                tracing::error!(%command_id, command_type, "asynchronous command without a queue slot");
                if let Err(err) = transaction.abort().await {
                    tracing::error!(%command_id, error = %err, "failed to record command failure");
                }
                return Err(GatewayError::command_failed(format!(
                    "Command {command_id} was not scheduled."
                )));
            }
            None => {}
        }

        match command.run().await {
            Ok(output) => Ok(Execution::inline(output, transaction)),
            Err(cause) => {
                tracing::error!(
                    %command_id,
                    command_type,
                    error = %format!("{cause:#}"),
                    "caught fatal error while handling command"
                );
                if let Err(err) = transaction.abort().await {
                    tracing::error!(%command_id, error = %err, "failed to record command failure");
                }
                Err(GatewayError::command_failed(format!(
                    "Command {command_id} failed during execution."
                )))
            }
        }
    }

    async fn worker_loop(
        worker: usize,
        queue: Arc<Mutex<mpsc::Receiver<Job>>>,
        token: CancellationToken,
    ) {
        loop {
            let next = {
                let mut rx = queue.lock().await;
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    job = rx.recv() => job,
                }
            };

            let Some(job) = next else {
                break;
            };
            job.complete(worker).await;
        }

        tracing::debug!(worker, "command worker stopped");
    }
}

/// 工作任务句柄：用于优雅关闭与等待任务结束
///
/// 关闭后仍在队列中的命令随守卫一同被丢弃，记录为 `failed`。
#[must_use = "dropping the WorkerHandle shuts the workers down"]
pub struct WorkerHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
