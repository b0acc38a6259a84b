//! 环境变量冲突数据模型
//!
//! 冲突指进程环境或 shell 配置文件里会覆盖托管配置的变量；
//! 它们会让代理接管静默失效，因此需要被检出并提示用户。

use serde::{Deserialize, Serialize};

use crate::models::AppId;

/// 进程环境命中的 source_path 固定值
pub const PROCESS_SOURCE: &str = "process";

/// 一条环境变量冲突
///
/// 去重标识是 `(var_name, source_path)`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvConflict {
    pub var_name: String,
    /// 进程环境为 [`PROCESS_SOURCE`]，否则为 rc 文件路径
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<AppId>,
}

impl EnvConflict {
    pub fn identity(&self) -> (&str, &str) {
        (&self.var_name, &self.source_path)
    }
}

/// 冲突横幅的展示状态
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictBannerState {
    pub visible: bool,
    pub conflicts: Vec<EnvConflict>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_app() {
        let a = EnvConflict {
            var_name: "ANTHROPIC_BASE_URL".to_string(),
            source_path: PROCESS_SOURCE.to_string(),
            app_id: Some(AppId::Claude),
        };
        let b = EnvConflict {
            app_id: None,
            ..a.clone()
        };
        assert_eq!(a.identity(), b.identity());
    }
}
