//! 命令存储协议（CommandStore）
//!
//! 核心只依赖该协议，具体存储后端由上层提供实现并注入。
//!
use crate::command::{Command, CommandId, CommandRecord, CommandStatus};
use crate::error::GatewayResult as Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait CommandStore: Send + Sync {
    /// 持久化命令并返回分配的标识，返回前须保证标识已落盘
    async fn persist(&self, command: &Command) -> Result<CommandId>;

    /// 原子地写入单条记录的状态；对任意先前状态都成立，重复写入同一终态为无操作
    async fn set_status(&self, command_id: CommandId, status: CommandStatus) -> Result<()>;

    /// 按标识降序分页读取；`limit == 0` 或越界的 `offset` 返回空列表
    async fn get_commands(&self, offset: usize, limit: usize) -> Result<Vec<CommandRecord>>;
}

#[async_trait]
impl<T> CommandStore for Arc<T>
where
    T: CommandStore + ?Sized,
{
    async fn persist(&self, command: &Command) -> Result<CommandId> {
        (**self).persist(command).await
    }

    async fn set_status(&self, command_id: CommandId, status: CommandStatus) -> Result<()> {
        (**self).set_status(command_id, status).await
    }

    async fn get_commands(&self, offset: usize, limit: usize) -> Result<Vec<CommandRecord>> {
        (**self).get_commands(offset, limit).await
    }
}
