use crate::command_handler::HandlerOutput;
use gateway_domain::command::{CommandId, CommandRecord};
use serde::Serialize;

/// 数据传输对象（DTO）
///
/// 面向传输层序列化的只读输出，与领域类型解耦。
pub trait Dto: Serialize + Send + Sync + 'static {}

/// `issue` 的成功响应
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub command_id: CommandId,
    pub ident: Option<String>,
    pub result: Option<serde_json::Value>,
    /// 同步执行已完成；异步命令为 `false`
    pub done: bool,
    pub created: bool,
    pub error: bool,
}

impl ExecutionResult {
    pub(crate) fn new(command_id: CommandId, output: HandlerOutput, done: bool) -> Self {
        Self {
            command_id,
            ident: output.ident,
            result: output.result,
            done,
            created: output.created,
            error: false,
        }
    }
}

impl Dto for ExecutionResult {}

impl Dto for CommandRecord {}
