use serde::{Deserialize, Serialize};

/// 命令列表查询条件（按命令标识倒序分页）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandQuery {
    pub offset: usize,
    pub limit: usize,
}

impl CommandQuery {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

impl Default for CommandQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}
