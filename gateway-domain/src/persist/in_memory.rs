//! 内存版命令存储（InMemoryCommandStore）
//!
//! 基于 `DashMap` 的轻量实现，满足 `CommandStore` 协议：
//! - `persist`：以原子计数器分配递增标识；
//! - `set_status`：单条记录的原子读改写，重复写入同一终态为无操作；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 注意：进程退出即丢失全部记录。

use crate::command::{Command, CommandId, CommandRecord, CommandStatus};
use crate::error::{GatewayError, GatewayResult as Result};
use crate::persist::CommandStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct InMemoryCommandStore {
    records: DashMap<CommandId, CommandRecord>,
    sequence: AtomicI64,
}

impl InMemoryCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已持久化的记录数
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 读取某条命令的当前状态
    pub fn status_of(&self, command_id: CommandId) -> Option<CommandStatus> {
        self.records.get(&command_id).map(|r| r.status)
    }

    pub fn record(&self, command_id: CommandId) -> Option<CommandRecord> {
        self.records.get(&command_id).map(|r| r.clone())
    }
}

#[async_trait]
impl CommandStore for InMemoryCommandStore {
    async fn persist(&self, command: &Command) -> Result<CommandId> {
        let command_id = CommandId::new(self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        self.records
            .insert(command_id, CommandRecord::pending(command_id, command));
        Ok(command_id)
    }

    async fn set_status(&self, command_id: CommandId, status: CommandStatus) -> Result<()> {
        let Some(mut record) = self.records.get_mut(&command_id) else {
            return Err(GatewayError::upstream_failure(format!(
                "no such command: {command_id}"
            )));
        };
        record.status = status;
        Ok(())
    }

    async fn get_commands(&self, offset: usize, limit: usize) -> Result<Vec<CommandRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut records: Vec<CommandRecord> =
            self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_unstable_by(|a, b| b.command_id.cmp(&a.command_id));

        Ok(records.into_iter().skip(offset).take(limit).collect())
    }
}
