//! 后端路由 - 基础设施层
//!
//! 严格按偏好顺序选择，不做负载均衡也不随机，保证重试可复现。
//! 每个会话持有自己的一组路由器，失败记录不会跨会话。

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::ModelPreferences;
use crate::error::ExhaustionError;
use crate::models::Stage;

/// 单个阶段的后端路由器
#[derive(Debug, Clone)]
pub struct ModelRouter {
    stage: Stage,
    candidates: Vec<String>,
    exhausted: HashSet<String>,
}

impl ModelRouter {
    pub fn new(stage: Stage, candidates: Vec<String>) -> Self {
        Self {
            stage,
            candidates,
            exhausted: HashSet::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// 排名最高且未耗尽的候选
    pub fn current(&self) -> Result<&str, ExhaustionError> {
        self.candidates
            .iter()
            .find(|candidate| !self.exhausted.contains(candidate.as_str()))
            .map(String::as_str)
            .ok_or(ExhaustionError { stage: self.stage })
    }

    /// 把候选移入耗尽集合（幂等）
    pub fn mark_failed(&mut self, candidate: &str) {
        if self.exhausted.insert(candidate.to_string()) {
            warn!("[{}] 后端 {} 已降级", self.stage, candidate);
        }
    }

    /// 清空耗尽集合，只在新会话开始时使用
    pub fn reset(&mut self) {
        debug!("[{}] 重置路由器", self.stage);
        self.exhausted.clear();
    }

    pub fn is_exhausted(&self, candidate: &str) -> bool {
        self.exhausted.contains(candidate)
    }
}

/// 一个会话的全部路由器
#[derive(Debug, Clone)]
pub struct SessionRouters {
    pub fetch: ModelRouter,
    pub analyze: ModelRouter,
    pub verify: ModelRouter,
    pub execute: ModelRouter,
    pub submit: ModelRouter,
}

impl SessionRouters {
    pub fn from_preferences(preferences: &ModelPreferences) -> Self {
        let router = |stage| ModelRouter::new(stage, preferences.for_stage(stage).to_vec());
        Self {
            fetch: router(Stage::Fetch),
            analyze: router(Stage::Analyze),
            verify: router(Stage::Verify),
            execute: router(Stage::Execute),
            submit: router(Stage::Submit),
        }
    }

    pub fn reset(&mut self) {
        self.fetch.reset();
        self.analyze.reset();
        self.verify.reset();
        self.execute.reset();
        self.submit.reset();
    }
}
