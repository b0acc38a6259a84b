//! 工具服务模块
//!
//! CLI 工具的版本检查与安装/升级。每个工具的检查独立失败，
//! 互不拖累；安装/升级用按工具 id 键控的在途操作集合做互斥：
//! 同一工具的冲突操作被拒绝，不同工具可以真正并发。

pub mod version;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::data::{Result, SwitchError};
use crate::http_client;
use crate::models::{AppId, DEFAULT_NPM_REGISTRY};
use crate::utils::{CommandResult, CommandRunner};

pub use version::{fetch_npm_latest, ToolVersionReport};

/// 外壳命令执行接口；注入假实现即可离线测试
#[async_trait]
pub trait ShellExec: Send + Sync {
    async fn run(&self, command: &str) -> CommandResult;
}

#[async_trait]
impl ShellExec for CommandRunner {
    async fn run(&self, command: &str) -> CommandResult {
        self.execute_async(command).await
    }
}

/// 安装/升级操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolAction {
    Install,
    Upgrade,
}

impl ToolAction {
    fn verb(&self) -> &'static str {
        match self {
            ToolAction::Install => "安装",
            ToolAction::Upgrade => "升级",
        }
    }
}

/// 安装/升级结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInstallResult {
    pub success: bool,
    pub app_id: AppId,
    pub action: ToolAction,
    pub message: String,
    pub output: String,
    pub error: Option<String>,
}

/// 在途操作标记的 RAII 守卫；任何退出路径都会释放标记
struct OpGuard {
    set: Arc<Mutex<HashSet<AppId>>>,
    app: AppId,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.app);
        }
    }
}

/// 工具服务
pub struct ToolService {
    executor: Arc<dyn ShellExec>,
    registry_url: String,
    in_flight: Arc<Mutex<HashSet<AppId>>>,
}

impl ToolService {
    pub fn new() -> Self {
        Self::with_executor(Arc::new(CommandRunner::new()), DEFAULT_NPM_REGISTRY)
    }

    pub fn with_executor(executor: Arc<dyn ShellExec>, registry_url: &str) -> Self {
        Self {
            executor,
            registry_url: registry_url.to_string(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 当前有在途安装/升级操作的工具
    pub fn ops_in_flight(&self) -> Vec<AppId> {
        self.in_flight
            .lock()
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 占住某工具的在途标记；已被占用时返回 Busy
    fn begin_op(&self, app: AppId) -> Result<OpGuard> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|e| SwitchError::Busy(e.to_string()))?;
        if !set.insert(app) {
            return Err(SwitchError::Busy(format!(
                "{} 已有安装/升级操作在进行",
                app.display_name()
            )));
        }
        Ok(OpGuard {
            set: Arc::clone(&self.in_flight),
            app,
        })
    }

    /// 检查单个工具的版本；所有失败都收敛进报告的 error 槽位
    pub async fn check_version(&self, app: AppId) -> ToolVersionReport {
        let result = self
            .executor
            .run(&format!("{} --version", app.cli_command()))
            .await;
        let (installed, error) =
            version::local_version_from_output(result.success, &result.stdout, &result.stderr);

        let latest =
            fetch_npm_latest(http_client::get(), &self.registry_url, app.npm_package()).await;

        ToolVersionReport::new(app, installed, latest, error)
    }

    /// 并发检查所有工具；单个工具出错不阻断其余工具
    pub async fn check_all_versions(&self) -> Vec<ToolVersionReport> {
        join_all(AppId::all().map(|app| self.check_version(app))).await
    }

    /// 安装或升级 CLI 工具
    ///
    /// 命令执行失败不作为 Err 返回，而是带 error 槽位的结果；
    /// Err 只用于同工具的在途冲突（Busy）。
    pub async fn install(&self, app: AppId, action: ToolAction) -> Result<ToolInstallResult> {
        let _guard = self.begin_op(app)?;

        let package = app.npm_package();
        let command = match action {
            ToolAction::Upgrade => format!("npm install -g --force {package}@latest"),
            ToolAction::Install => format!("npm install -g --force {package}"),
        };
        tracing::info!(app = %app, action = ?action, command = %command, "执行安装命令");

        let result = self.executor.run(&command).await;

        if result.success {
            // 装完回读版本验证
            let verify = self
                .executor
                .run(&format!("{} --version", app.cli_command()))
                .await;
            let (installed, _) =
                version::local_version_from_output(verify.success, &verify.stdout, &verify.stderr);
            let version_msg = installed
                .map(|v| format!("当前版本: {v}"))
                .unwrap_or_else(|| "版本检测失败，请手动验证".to_string());

            Ok(ToolInstallResult {
                success: true,
                app_id: app,
                action,
                message: format!("{}成功，{version_msg}", action.verb()),
                output: result.stdout,
                error: None,
            })
        } else {
            let error_msg = if result.stderr.is_empty() {
                result.stdout.clone()
            } else {
                result.stderr.clone()
            };
            tracing::warn!(app = %app, error = %error_msg, "安装命令失败");
            Ok(ToolInstallResult {
                success: false,
                app_id: app,
                action,
                message: format!("{}失败", action.verb()),
                output: result.stdout,
                error: Some(error_msg),
            })
        }
    }
}

impl Default for ToolService {
    fn default() -> Self {
        Self::new()
    }
}
