//! 持久化端口（persist）
//!
//! 定义命令存储协议与事务守卫，并提供：
//! - 命令持久化、状态写入与分页读取（`CommandStore`）；
//! - 绑定单条命令终态写入权的事务守卫（`CommandTransaction`）；
//! - 内存实现（`InMemoryCommandStore`）与可选的 SQLite 实现（`SqliteCommandStore`）。
//!
//! 该模块聚焦协议与守卫语义，生产环境的存储后端由上层提供实现并注入。
//!
mod command_store;
mod in_memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod transaction;

pub use command_store::CommandStore;
pub use in_memory::InMemoryCommandStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCommandStore;
pub use transaction::CommandTransaction;
