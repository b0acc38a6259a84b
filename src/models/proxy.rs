//! 代理接管状态数据模型

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::AppId;

/// 某个工具当前实际路由到的供应商
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTarget {
    pub app_id: AppId,
    pub provider_id: String,
}

/// 代理进程上报的运行状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    pub is_running: bool,
    /// 有序目标列表；同一工具最多一个目标
    #[serde(default)]
    pub active_targets: Vec<ActiveTarget>,
}

impl ProxyStatus {
    /// 规整上报数据：同一工具出现多个目标时只保留最先出现的
    pub fn normalized(mut self) -> Self {
        let mut seen = std::collections::HashSet::new();
        self.active_targets.retain(|t| seen.insert(t.app_id));
        self
    }

    pub fn target_for(&self, app: AppId) -> Option<&str> {
        self.active_targets
            .iter()
            .find(|t| t.app_id == app)
            .map(|t| t.provider_id.as_str())
    }
}

/// 汇总给状态指示器的接管概况
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeoverSummary {
    pub is_running: bool,
    pub per_app_active: HashMap<AppId, Option<String>>,
    pub per_app_failover: HashMap<AppId, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_keeps_first_target_per_app() {
        let status = ProxyStatus {
            is_running: true,
            active_targets: vec![
                ActiveTarget {
                    app_id: AppId::Claude,
                    provider_id: "a".to_string(),
                },
                ActiveTarget {
                    app_id: AppId::Claude,
                    provider_id: "b".to_string(),
                },
                ActiveTarget {
                    app_id: AppId::Codex,
                    provider_id: "c".to_string(),
                },
            ],
        }
        .normalized();

        assert_eq!(status.active_targets.len(), 2);
        assert_eq!(status.target_for(AppId::Claude), Some("a"));
        assert_eq!(status.target_for(AppId::Codex), Some("c"));
        assert_eq!(status.target_for(AppId::Gemini), None);
    }
}
