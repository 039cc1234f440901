//! 命令网关应用层：处理器注册、参数模式、执行器与网关编排
//!
pub mod command_handler;
pub mod config;
pub mod dto;
pub mod error;
pub mod gateway;
pub mod query;
pub mod registry;
pub mod runner;
pub mod schema;

pub use command_handler::{CommandHandler, HandlerOutput, NoParams};
pub use config::{Backpressure, GatewayConfig, RunnerConfig};
pub use dto::{Dto, ExecutionResult};
pub use error::RegistryError;
pub use gateway::Gateway;
pub use query::CommandQuery;
pub use registry::{HandlerRegistry, HandlerSet, HandlerSource, ValidatedCommand};
pub use runner::{CommandRunner, Execution, Reservation, Settlement, WorkerHandle};
pub use schema::{FieldKind, ParamSchema};
