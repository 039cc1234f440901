//! 网关统一错误定义（错误分类）
//!
//! 封闭的失败类型集合，由注册表、持久化、执行器与网关共同使用，
//! 任何跨组件边界的错误都必须是 `GatewayError` 的某个成员，
//! 以便传输层能够穷尽地映射到状态码。
//!
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// 未提供原因时使用的默认说明
pub const DEFAULT_REASON: &str =
    "Please contact the system administrator for further information.";

/// 结构化错误上下文（字段 -> 说明），例如字段级校验错误
pub type ErrorContext = BTreeMap<String, String>;

/// 统一错误类型
///
/// 有意不标记 `#[non_exhaustive]`：传输层需要对全部成员做穷尽匹配。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("duplicate entity: {reason}")]
    DuplicateEntity { reason: String, context: ErrorContext },
    #[error("command rejected: {reason}")]
    CommandRejected { reason: String, context: ErrorContext },
    #[error("read-only mode: {reason}")]
    ReadOnlyMode { reason: String, context: ErrorContext },
    #[error("upstream failure: {reason}")]
    UpstreamFailure { reason: String, context: ErrorContext },
    #[error("not authorized: {reason}")]
    NotAuthorized { reason: String, context: ErrorContext },
    #[error("command failed: {reason}")]
    CommandFailed { reason: String, context: ErrorContext },
}

/// 统一 Result 类型别名
pub type GatewayResult<T> = Result<T, GatewayError>;

/// 错误种类（与 `GatewayError` 成员一一对应）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateEntity,
    CommandRejected,
    ReadOnlyMode,
    UpstreamFailure,
    NotAuthorized,
    CommandFailed,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::DuplicateEntity,
        ErrorKind::CommandRejected,
        ErrorKind::ReadOnlyMode,
        ErrorKind::UpstreamFailure,
        ErrorKind::NotAuthorized,
        ErrorKind::CommandFailed,
    ];

    /// 稳定的机器可读编码，供传输层渲染
    pub const fn code(&self) -> &'static str {
        match self {
            ErrorKind::DuplicateEntity => "DUPLICATE_ENTITY",
            ErrorKind::CommandRejected => "COMMAND_REJECTED",
            ErrorKind::ReadOnlyMode => "READONLY_MODE",
            ErrorKind::UpstreamFailure => "UPSTREAM_FAILURE",
            ErrorKind::NotAuthorized => "NOT_AUTHORIZED",
            ErrorKind::CommandFailed => "COMMAND_FAILED",
        }
    }
}

// 序列化形式即 `code()`
impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl GatewayError {
    /// 以指定种类与原因构造错误；`reason` 为 `None` 时使用默认说明
    pub fn new(kind: ErrorKind, reason: Option<String>) -> Self {
        let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
        let context = ErrorContext::new();
        match kind {
            ErrorKind::DuplicateEntity => Self::DuplicateEntity { reason, context },
            ErrorKind::CommandRejected => Self::CommandRejected { reason, context },
            ErrorKind::ReadOnlyMode => Self::ReadOnlyMode { reason, context },
            ErrorKind::UpstreamFailure => Self::UpstreamFailure { reason, context },
            ErrorKind::NotAuthorized => Self::NotAuthorized { reason, context },
            ErrorKind::CommandFailed => Self::CommandFailed { reason, context },
        }
    }

    pub fn duplicate_entity(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateEntity, Some(reason.into()))
    }

    pub fn command_rejected(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommandRejected, Some(reason.into()))
    }

    pub fn read_only_mode(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReadOnlyMode, Some(reason.into()))
    }

    pub fn upstream_failure(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamFailure, Some(reason.into()))
    }

    pub fn not_authorized(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAuthorized, Some(reason.into()))
    }

    pub fn command_failed(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommandFailed, Some(reason.into()))
    }

    /// 附加结构化上下文（覆盖已有上下文）
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        *self.context_mut() = ctx;
        self
    }

    /// 追加单条上下文
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateEntity { .. } => ErrorKind::DuplicateEntity,
            Self::CommandRejected { .. } => ErrorKind::CommandRejected,
            Self::ReadOnlyMode { .. } => ErrorKind::ReadOnlyMode,
            Self::UpstreamFailure { .. } => ErrorKind::UpstreamFailure,
            Self::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            Self::CommandFailed { .. } => ErrorKind::CommandFailed,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::DuplicateEntity { reason, .. }
            | Self::CommandRejected { reason, .. }
            | Self::ReadOnlyMode { reason, .. }
            | Self::UpstreamFailure { reason, .. }
            | Self::NotAuthorized { reason, .. }
            | Self::CommandFailed { reason, .. } => reason,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::DuplicateEntity { context, .. }
            | Self::CommandRejected { context, .. }
            | Self::ReadOnlyMode { context, .. }
            | Self::UpstreamFailure { context, .. }
            | Self::NotAuthorized { context, .. }
            | Self::CommandFailed { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::DuplicateEntity { context, .. }
            | Self::CommandRejected { context, .. }
            | Self::ReadOnlyMode { context, .. }
            | Self::UpstreamFailure { context, .. }
            | Self::NotAuthorized { context, .. }
            | Self::CommandFailed { context, .. } => context,
        }
    }
}

// ---- Cross-crate conversions for infrastructure convenience ----
// 存储后端的失败统一视为上游故障

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::upstream_failure(format!("serialization error: {err}"))
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::upstream_failure(format!("database error: {err}"))
    }
}
