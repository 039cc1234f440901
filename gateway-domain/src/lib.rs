//! 命令网关领域层（gateway-domain）
//!
//! 提供命令网关核心所依赖的通用构件：
//! - 命令模型与执行状态（`command`）
//! - 封闭的错误分类（`error`）
//! - 持久化端口与事务守卫（`persist`）
//!
//! 本 crate 不绑定具体传输与存储实现，仅定义协议与最小必要的类型，
//! 以便在不同基础设施（例如 SQLite、内存）上进行适配实现。
//!
pub mod command;
pub mod error;
pub mod persist;
