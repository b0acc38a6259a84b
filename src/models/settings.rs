//! 控制平面设置

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::logging::LoggingConfig;

/// npm registry 默认地址
pub const DEFAULT_NPM_REGISTRY: &str = "https://registry.npmjs.org";

/// 控制平面可调参数
///
/// 默认值即生产配置；嵌入方可整体反序列化后局部覆盖。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlPlaneSettings {
    /// 版本检查使用的 npm registry
    pub npm_registry_url: String,
    /// 冲突扫描的 rc 文件清单；None 使用内置的常见 shell 配置文件
    pub rc_files: Option<Vec<PathBuf>>,
    /// 是否扫描进程环境
    pub scan_process_env: bool,
    /// 日志配置
    pub logging: LoggingConfig,
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            npm_registry_url: DEFAULT_NPM_REGISTRY.to_string(),
            rc_files: None,
            scan_process_env: true,
            logging: LoggingConfig::default(),
        }
    }
}
