//! 命令（Command）与执行状态
//!
//! - `Command`：提交给网关执行的值，持久化时获得唯一标识，之后标识/类型/参数不再变化；
//! - `CommandStatus`：`pending → done | failed`，每条命令仅迁移一次；
//! - `CommandRecord`：存储中可审计的命令投影。
//!
use crate::error::{GatewayError, GatewayResult};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 原始/已校验的命令参数（字段名 -> 值）
pub type Params = serde_json::Map<String, serde_json::Value>;

/// 命令标识：由持久化层分配，单调递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(i64);

impl CommandId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CommandId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// 提交执行的命令
///
/// ```
/// use gateway_domain::command::Command;
///
/// let cmd = Command::builder()
///     .command_type("echo")
///     .issuer("1")
///     .authenticated_by("1")
///     .host("127.0.0.1")
///     .build();
/// assert!(cmd.id().is_none());
/// assert!(!cmd.is_asynchronous());
/// ```
#[derive(Builder, Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// 持久化前为空，由事务守卫在持久化时写入
    #[builder(skip)]
    #[serde(skip_deserializing)]
    id: Option<CommandId>,
    /// 处理器对应的命令类型
    #[builder(into)]
    command_type: String,
    /// 参数；经注册表校验后被替换为规范化的类型化值
    #[builder(default)]
    #[serde(default)]
    params: Params,
    /// 提交时确定的执行模式
    #[builder(default)]
    #[serde(default)]
    asynchronous: bool,
    /// 发起者（对核心不透明）
    #[builder(into)]
    issuer: String,
    /// 认证方（对核心不透明）
    #[builder(into)]
    authenticated_by: String,
    /// 来源地址（对核心不透明）
    #[builder(into)]
    host: String,
    #[builder(default = Utc::now())]
    #[serde(default = "Utc::now")]
    submitted_at: DateTime<Utc>,
}

impl Command {
    pub fn id(&self) -> Option<CommandId> {
        self.id
    }

    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn authenticated_by(&self) -> &str {
        &self.authenticated_by
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// 以校验后的参数替换原始参数；持久化之后不允许再修改
    pub fn replace_params(&mut self, params: Params) -> GatewayResult<()> {
        if let Some(id) = self.id {
            return Err(GatewayError::command_rejected(format!(
                "command {id} is already persisted; its parameters are immutable"
            )));
        }
        self.params = params;
        Ok(())
    }

    /// 写入持久化分配的标识，只允许一次
    pub(crate) fn assign_id(&mut self, id: CommandId) -> GatewayResult<()> {
        if let Some(existing) = self.id {
            return Err(GatewayError::command_rejected(format!(
                "command is already persisted as {existing}"
            )));
        }
        self.id = Some(id);
        Ok(())
    }
}

/// 命令执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Done,
    Failed,
}

impl CommandStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Done => "done",
            CommandStatus::Failed => "failed",
        }
    }

    /// 是否为终态（done/failed）
    pub const fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Done | CommandStatus::Failed)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommandStatus::Pending),
            "done" => Ok(CommandStatus::Done),
            "failed" => Ok(CommandStatus::Failed),
            other => Err(GatewayError::upstream_failure(format!(
                "unknown command status: {other}"
            ))),
        }
    }
}

/// 存储中的命令记录（审计/列表视图）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command_id: CommandId,
    pub command_type: String,
    pub params: Params,
    pub issuer: String,
    pub authenticated_by: String,
    pub host: String,
    pub submitted_at: DateTime<Utc>,
    pub status: CommandStatus,
}

impl CommandRecord {
    /// 新持久化命令对应的 `pending` 记录
    pub fn pending(command_id: CommandId, command: &Command) -> Self {
        Self {
            command_id,
            command_type: command.command_type().to_string(),
            params: command.params().clone(),
            issuer: command.issuer().to_string(),
            authenticated_by: command.authenticated_by().to_string(),
            host: command.host().to_string(),
            submitted_at: command.submitted_at(),
            status: CommandStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command() -> Command {
        Command::builder()
            .command_type("echo")
            .params(json!({"foo": 1}).as_object().cloned().unwrap())
            .issuer("1")
            .authenticated_by("2")
            .host("10.0.0.1")
            .build()
    }

    #[test]
    fn id_is_assigned_once() {
        let mut cmd = command();
        cmd.assign_id(CommandId::new(7)).unwrap();
        assert_eq!(cmd.id(), Some(CommandId::new(7)));

        let err = cmd.assign_id(CommandId::new(8)).unwrap_err();
        assert!(matches!(err, GatewayError::CommandRejected { .. }));
        assert_eq!(cmd.id(), Some(CommandId::new(7)));
    }

    #[test]
    fn params_are_frozen_after_persist() {
        let mut cmd = command();
        cmd.replace_params(Params::new()).unwrap();
        assert!(cmd.params().is_empty());

        cmd.assign_id(CommandId::new(1)).unwrap();
        assert!(cmd.replace_params(Params::new()).is_err());
    }

    #[test]
    fn status_parses_and_displays() {
        for status in [CommandStatus::Pending, CommandStatus::Done, CommandStatus::Failed] {
            assert_eq!(status.as_str().parse::<CommandStatus>().unwrap(), status);
        }
        assert!("running".parse::<CommandStatus>().is_err());
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(CommandStatus::Done.is_terminal());
        assert_eq!(serde_json::to_value(CommandStatus::Failed).unwrap(), json!("failed"));
    }

    #[test]
    fn deserialized_command_never_carries_an_id() {
        let cmd: Command = serde_json::from_value(json!({
            "id": 99,
            "command_type": "echo",
            "issuer": "1",
            "authenticated_by": "1",
            "host": "localhost"
        }))
        .unwrap();
        assert!(cmd.id().is_none());
        assert!(cmd.params().is_empty());
        assert!(!cmd.is_asynchronous());
    }
}
