//! 会话登记表 - 编排层
//!
//! 保存每个会话最近一次发布的状态快照，以及终止后的归档报告。
//! 快照只在状态迁移时写入，读取不会触发任何计算。
//! 已结束的会话最多保留 `max_archived` 个，超出时淘汰最早创建的。

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{SessionId, SessionReport, SessionState, StatusSnapshot};

#[derive(Debug, Clone)]
struct SessionEntry {
    email: String,
    created_at: DateTime<Local>,
    status: StatusSnapshot,
    report: Option<SessionReport>,
}

/// 会话登记表
///
/// 所有会话共享一个实例，用 RwLock 保护。
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    max_archived: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_retention(1000)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最多保留 `max_archived` 个已结束会话（至少 1 个）
    pub fn with_retention(max_archived: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_archived: max_archived.max(1),
        }
    }

    /// 登记新会话，初始状态为 RECEIVED
    pub async fn register(&self, id: &SessionId, email: &str, total_budget: Duration) {
        let entry = SessionEntry {
            email: email.to_string(),
            created_at: Local::now(),
            status: StatusSnapshot {
                session_id: id.clone(),
                state: SessionState::Received,
                chain_depth: 0,
                elapsed_ms: 0,
                remaining_ms: total_budget.as_millis() as u64,
            },
            report: None,
        };
        self.sessions.write().await.insert(id.clone(), entry);
        debug!("登记会话 {}", id);
    }

    /// 发布一次状态迁移后的快照
    pub async fn publish(&self, snapshot: StatusSnapshot) {
        if let Some(entry) = self.sessions.write().await.get_mut(&snapshot.session_id) {
            entry.status = snapshot;
        }
    }

    /// 会话终止，保存归档报告
    pub async fn complete(&self, report: SessionReport) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(&report.session_id) {
            entry.status.state = report.final_state;
            entry.status.chain_depth = report.chain_depth;
            entry.report = Some(report);
        }
        self.evict_archived(&mut sessions);
    }

    /// 淘汰超出保留上限的已结束会话，运行中的会话不受影响
    fn evict_archived(&self, sessions: &mut HashMap<SessionId, SessionEntry>) {
        let mut archived: Vec<(DateTime<Local>, SessionId)> = sessions
            .iter()
            .filter(|(_, entry)| entry.report.is_some())
            .map(|(id, entry)| (entry.created_at, id.clone()))
            .collect();
        if archived.len() <= self.max_archived {
            return;
        }
        archived.sort_by(|a, b| a.0.cmp(&b.0));
        let excess = archived.len() - self.max_archived;
        for (_, id) in archived.into_iter().take(excess) {
            sessions.remove(&id);
            debug!("淘汰已结束会话 {}", id);
        }
    }

    /// 读取状态快照（无副作用）
    pub async fn get_status(&self, id: &SessionId) -> AppResult<StatusSnapshot> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))
    }

    /// 读取归档报告，会话未结束时返回 None
    pub async fn get_report(&self, id: &SessionId) -> AppResult<Option<SessionReport>> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|entry| entry.report.clone())
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))
    }

    /// 列出会话快照，最新的在前；可按邮箱过滤
    pub async fn list_sessions(&self, email: Option<&str>) -> Vec<StatusSnapshot> {
        let sessions = self.sessions.read().await;
        let mut entries: Vec<&SessionEntry> = sessions
            .values()
            .filter(|entry| email.map_or(true, |email| entry.email == email))
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.into_iter().map(|entry| entry.status.clone()).collect()
    }
}
