/// 启动期的注册错误（不属于运行期错误分类）
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("handler already registered: command={command_type}")]
    AlreadyRegistered { command_type: &'static str },
}
