//! 环境变量冲突检测
//!
//! 进程环境或 shell 配置文件里的 ANTHROPIC_BASE_URL 之类变量会
//! 绕过托管配置、让代理接管静默失效。检测器维护一份按
//! `(变量名, 来源路径)` 去重的运行集合，并驱动冲突横幅的显隐。

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::data::{Result, SwitchError};
use crate::models::{AppId, ConflictBannerState, EnvConflict, PROCESS_SOURCE};

/// 环境扫描接口（外部协作方）
#[async_trait]
pub trait EnvScanner: Send + Sync {
    /// 扫描冲突；`app` 为 None 时扫描全部工具
    async fn scan_conflicts(&self, app: Option<AppId>) -> Result<Vec<EnvConflict>>;
    /// 删除一条冲突来源（进程变量或 rc 文件中的赋值行）
    async fn delete_conflicting_var(&self, var_name: &str, source_path: &str) -> Result<()>;
}

#[derive(Default)]
struct DetectorState {
    conflicts: Vec<EnvConflict>,
    seen: HashSet<(String, String)>,
    banner_visible: bool,
    dismissed: bool,
}

/// 冲突检测器
pub struct ConflictDetector {
    scanner: Arc<dyn EnvScanner>,
    state: RwLock<DetectorState>,
}

impl ConflictDetector {
    pub fn new(scanner: Arc<dyn EnvScanner>) -> Self {
        Self {
            scanner,
            state: RwLock::new(DetectorState::default()),
        }
    }

    /// 把新扫出的冲突并入运行集合（按标识去重），并按需点亮横幅。
    /// 横幅每个会话只在集合首次变为非空时出现一次；用户撤下后
    /// 即使后续出现新标识的冲突也保持隐藏。
    fn merge(state: &mut DetectorState, incoming: Vec<EnvConflict>) {
        for c in incoming {
            let key = (c.var_name.clone(), c.source_path.clone());
            if state.seen.insert(key) {
                state.conflicts.push(c);
            }
        }
        if !state.conflicts.is_empty() && !state.dismissed {
            state.banner_visible = true;
        }
    }

    /// 启动时的全量扫描
    pub async fn scan_all(&self) -> Result<HashMap<AppId, Vec<EnvConflict>>> {
        let found = self.scanner.scan_conflicts(None).await?;

        let mut by_app: HashMap<AppId, Vec<EnvConflict>> = HashMap::new();
        for c in &found {
            if let Some(app) = c.app_id {
                by_app.entry(app).or_default().push(c.clone());
            }
        }

        let mut state = self.state.write().await;
        Self::merge(&mut state, found);
        Ok(by_app)
    }

    /// 活动工具变化时的增量扫描
    pub async fn scan(&self, app: AppId) -> Result<Vec<EnvConflict>> {
        let found = self.scanner.scan_conflicts(Some(app)).await?;
        let mut state = self.state.write().await;
        Self::merge(&mut state, found.clone());
        Ok(found)
    }

    /// 用户撤下横幅；本会话内不再出现
    pub async fn dismiss_banner(&self) {
        let mut state = self.state.write().await;
        state.dismissed = true;
        state.banner_visible = false;
    }

    /// 用户清理了若干冲突来源之后：全量重扫并整体替换集合。
    /// 集合为空时无条件隐藏横幅（与撤下状态无关）。
    pub async fn on_conflicts_resolved(&self) -> Result<()> {
        let found = self.scanner.scan_conflicts(None).await?;

        let mut state = self.state.write().await;
        state.conflicts.clear();
        state.seen.clear();
        for c in found {
            let key = (c.var_name.clone(), c.source_path.clone());
            if state.seen.insert(key) {
                state.conflicts.push(c);
            }
        }
        if state.conflicts.is_empty() {
            state.banner_visible = false;
        } else if state.dismissed {
            state.banner_visible = false;
        }
        Ok(())
    }

    /// 删除一条冲突来源并重扫
    pub async fn delete_conflict(&self, var_name: &str, source_path: &str) -> Result<()> {
        self.scanner
            .delete_conflicting_var(var_name, source_path)
            .await?;
        self.on_conflicts_resolved().await
    }

    pub async fn banner_state(&self) -> ConflictBannerState {
        let state = self.state.read().await;
        ConflictBannerState {
            visible: state.banner_visible,
            conflicts: state.conflicts.clone(),
        }
    }

    pub async fn conflicts(&self) -> Vec<EnvConflict> {
        self.state.read().await.conflicts.clone()
    }
}

/// rc 文件里的变量赋值行（可带 export 前缀）
static ENV_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=").expect("invalid env line regex")
});

/// 进程环境 + shell rc 文件的扫描实现
pub struct ShellEnvScanner {
    rc_files: Vec<PathBuf>,
    scan_process: bool,
}

impl ShellEnvScanner {
    /// 常见 shell 配置文件
    pub fn default_rc_files() -> Vec<PathBuf> {
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        [".bashrc", ".zshrc", ".profile", ".bash_profile", ".zprofile"]
            .iter()
            .map(|f| home.join(f))
            .collect()
    }

    pub fn new() -> Self {
        Self {
            rc_files: Self::default_rc_files(),
            scan_process: true,
        }
    }

    pub fn with_sources(rc_files: Vec<PathBuf>, scan_process: bool) -> Self {
        Self {
            rc_files,
            scan_process,
        }
    }

    /// 读取一个 rc 文件里被赋值的变量名集合；文件不存在不算错误
    fn assigned_vars(path: &PathBuf) -> Result<HashSet<String>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(SwitchError::io(path.clone(), e)),
        };
        Ok(content
            .lines()
            .filter_map(|line| ENV_LINE_RE.captures(line))
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect())
    }
}

impl Default for ShellEnvScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnvScanner for ShellEnvScanner {
    async fn scan_conflicts(&self, app: Option<AppId>) -> Result<Vec<EnvConflict>> {
        let apps: Vec<AppId> = match app {
            Some(a) => vec![a],
            None => AppId::all().to_vec(),
        };

        let mut file_vars: Vec<(PathBuf, HashSet<String>)> = Vec::new();
        for path in &self.rc_files {
            file_vars.push((path.clone(), Self::assigned_vars(path)?));
        }

        let mut conflicts = Vec::new();
        for app in apps {
            for var in app.watched_env_vars() {
                if self.scan_process && std::env::var_os(var).is_some() {
                    conflicts.push(EnvConflict {
                        var_name: (*var).to_string(),
                        source_path: PROCESS_SOURCE.to_string(),
                        app_id: Some(app),
                    });
                }
                for (path, vars) in &file_vars {
                    if vars.contains(*var) {
                        conflicts.push(EnvConflict {
                            var_name: (*var).to_string(),
                            source_path: path.display().to_string(),
                            app_id: Some(app),
                        });
                    }
                }
            }
        }
        Ok(conflicts)
    }

    async fn delete_conflicting_var(&self, var_name: &str, source_path: &str) -> Result<()> {
        if source_path == PROCESS_SOURCE {
            std::env::remove_var(var_name);
            tracing::info!(var = %var_name, "已从进程环境移除冲突变量");
            return Ok(());
        }

        let path = PathBuf::from(source_path);
        let content = fs::read_to_string(&path).map_err(|e| SwitchError::io(path.clone(), e))?;

        // 只删掉该变量的赋值行，注释和其余内容保持原样
        let kept: Vec<&str> = content
            .lines()
            .filter(|line| {
                ENV_LINE_RE
                    .captures(line)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str() != var_name)
                    .unwrap_or(true)
            })
            .collect();

        let mut new_content = kept.join("\n");
        if !new_content.is_empty() {
            new_content.push('\n');
        }
        fs::write(&path, new_content).map_err(|e| SwitchError::io(path.clone(), e))?;
        tracing::info!(var = %var_name, path = %source_path, "已从 rc 文件移除冲突赋值");
        Ok(())
    }
}
