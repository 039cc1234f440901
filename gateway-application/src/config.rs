//! 网关与执行器配置
//!
use serde::{Deserialize, Serialize};

/// 异步队列已满时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// 立即拒绝（`UpstreamFailure`）
    #[default]
    Reject,
    /// 提交方等待空闲槽位
    Wait,
}

/// 执行器配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// 异步命令的工作任务数
    pub workers: usize,
    /// 等待执行的异步命令队列容量
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            backpressure: Backpressure::Reject,
        }
    }
}

/// 网关配置
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 只读模式：拒绝全部命令且不产生副作用
    pub read_only: bool,
    pub runner: RunnerConfig,
}
