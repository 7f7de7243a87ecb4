//! 尝试上下文
//!
//! 封装"我正在处理哪个会话的第几题"这一信息

use std::fmt::Display;

use crate::models::SessionId;

/// 尝试上下文
///
/// 只用于日志和提交请求，不持有任何可变状态
#[derive(Debug, Clone)]
pub struct AttemptCtx {
    /// 会话ID
    pub session_id: SessionId,

    /// 链式题目中的序号（从 0 开始）
    pub hop: usize,

    /// 当前题目 URL
    pub url: String,
}

impl AttemptCtx {
    pub fn new(session_id: SessionId, hop: usize, url: impl Into<String>) -> Self {
        Self {
            session_id,
            hop,
            url: url.into(),
        }
    }
}

impl Display for AttemptCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short_id: String = self.session_id.as_str().chars().take(8).collect();
        write!(f, "[会话 {} 第{}题]", short_id, self.hop + 1)
    }
}
