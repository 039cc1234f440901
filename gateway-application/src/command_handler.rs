use crate::schema::ParamSchema;
use async_trait::async_trait;
use gateway_domain::command::{Command, Params};
use gateway_domain::error::GatewayResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 命令处理器
///
/// 每种命令类型对应唯一一个处理器，负责：
/// - 以 `schema`/`validate` 将原始参数校验为类型化参数；
/// - 可选的 `authorize` 授权检查（默认放行）；
/// - 以 `run` 执行命令。
///
/// `run` 返回的任何错误（以及 panic）都会在执行器边界被统一转换为 `CommandFailed`，
/// 调用方只会看到错误分类，不会看到处理器内部的错误类型。
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// 命令类型的稳定名称（建议常量字符串，不随重构变化）
    const COMMAND_TYPE: &'static str;

    /// 校验后的类型化参数
    type Params: Serialize + DeserializeOwned + Send + 'static;

    /// 参数模式
    fn schema(&self) -> ParamSchema;

    /// 将原始参数校验为类型化参数，失败时返回 `CommandRejected`（附字段级上下文）
    fn validate(&self, raw: &Params) -> GatewayResult<Self::Params> {
        self.schema().load(raw)
    }

    /// 持久化之前的授权检查，拒绝时返回 `NotAuthorized`
    fn authorize(&self, _command: &Command) -> GatewayResult<()> {
        Ok(())
    }

    async fn run(&self, command: &Command, params: Self::Params) -> anyhow::Result<HandlerOutput>;
}

/// 无参数命令使用的参数类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoParams {}

/// 处理器的执行产出
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutput {
    /// 受影响资源的标识（由处理器决定）
    pub ident: Option<String>,
    pub result: Option<serde_json::Value>,
    /// 处理器是否创建了新资源
    pub created: bool,
}

impl HandlerOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_result(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    /// 创建了新资源
    pub fn created(ident: impl Into<String>) -> Self {
        Self {
            ident: Some(ident.into()),
            result: None,
            created: true,
        }
    }
}
