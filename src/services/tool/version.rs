//! 工具版本检查
//!
//! 本地版本来自 `<cli> --version`，最新版本来自 npm registry。

use crate::models::AppId;
use crate::utils::{has_update, parse_version_string};
use serde::{Deserialize, Serialize};

/// 单个工具的版本报告
///
/// 检查失败只落在自己的 error 槽位里，不影响其他工具。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolVersionReport {
    pub app_id: AppId,
    pub installed: Option<String>,
    pub latest: Option<String>,
    pub has_update: bool,
    pub error: Option<String>,
}

impl ToolVersionReport {
    pub fn new(
        app_id: AppId,
        installed: Option<String>,
        latest: Option<String>,
        error: Option<String>,
    ) -> Self {
        let has_update = match (&installed, &latest) {
            (installed, Some(latest)) => has_update(installed.as_deref(), latest),
            _ => false,
        };
        Self {
            app_id,
            installed,
            latest,
            has_update,
            error,
        }
    }
}

/// 从 npm registry 拉取最新版本号
pub async fn fetch_npm_latest(
    client: &reqwest::Client,
    registry_url: &str,
    package: &str,
) -> Option<String> {
    let url = format!("{}/{}", registry_url.trim_end_matches('/'), package);
    match client.get(&url).send().await {
        Ok(resp) => match resp.json::<serde_json::Value>().await {
            Ok(json) => json
                .get("dist-tags")
                .and_then(|tags| tags.get("latest"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            Err(e) => {
                tracing::debug!(package = %package, error = %e, "npm registry 响应解析失败");
                None
            }
        },
        Err(e) => {
            tracing::debug!(package = %package, error = %e, "npm registry 请求失败");
            None
        }
    }
}

/// 从 `--version` 输出提取本地版本；失败时返回错误描述
pub fn local_version_from_output(
    success: bool,
    stdout: &str,
    stderr: &str,
) -> (Option<String>, Option<String>) {
    if success {
        let raw = if stdout.is_empty() { stderr } else { stdout };
        if raw.is_empty() {
            (None, Some("not installed or not executable".to_string()))
        } else {
            (Some(parse_version_string(raw)), None)
        }
    } else {
        let err = if stderr.is_empty() { stdout } else { stderr };
        (
            None,
            Some(if err.is_empty() {
                "not installed or not executable".to_string()
            } else {
                err.to_string()
            }),
        )
    }
}
