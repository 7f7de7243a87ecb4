//! 校验结论

use serde::{Deserialize, Serialize};

use crate::error::CallError;
use crate::models::Stage;

/// 一次校验的结论
///
/// `Reject` 必须携带非空的反馈，反馈会注入下一轮 analyze 调用。
/// 空反馈的拒绝视为校验后端返回了畸形结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject { feedback: String },
}

impl Verdict {
    /// 构造拒绝结论，空反馈返回错误
    pub fn reject(feedback: impl Into<String>) -> Result<Self, CallError> {
        Verdict::Reject {
            feedback: feedback.into(),
        }
        .ensure_well_formed()
    }

    /// 检查结论是否满足"拒绝必带反馈"的约束
    pub fn ensure_well_formed(self) -> Result<Self, CallError> {
        match &self {
            Verdict::Reject { feedback } if feedback.trim().is_empty() => {
                Err(CallError::Malformed {
                    stage: Stage::Verify,
                    reason: "拒绝结论缺少反馈".to_string(),
                })
            }
            _ => Ok(self),
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }

    pub fn feedback(&self) -> Option<&str> {
        match self {
            Verdict::Accept => None,
            Verdict::Reject { feedback } => Some(feedback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_requires_feedback() {
        assert!(Verdict::reject("").is_err());
        assert!(Verdict::reject("   \n").is_err());

        let verdict = Verdict::reject("列名写错了").unwrap();
        assert_eq!(verdict.feedback(), Some("列名写错了"));
        assert!(!verdict.is_accept());
    }

    #[test]
    fn test_accept_is_always_well_formed() {
        let verdict = Verdict::Accept.ensure_well_formed().unwrap();
        assert!(verdict.is_accept());
        assert_eq!(verdict.feedback(), None);
    }

    #[test]
    fn test_verdict_serde_shape() {
        let json = serde_json::to_value(Verdict::reject("再检查单位").unwrap()).unwrap();
        assert_eq!(json["verdict"], "reject");
        assert_eq!(json["feedback"], "再检查单位");
    }
}
