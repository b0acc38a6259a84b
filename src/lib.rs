// lib.rs - 暴露控制平面给宿主应用使用

pub mod data;
pub mod http_client;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

pub use models::*;
// 数据层：错误类型与持久化接口
pub use data::{MemoryStore, ProviderStore, Result, SwitchError};
// 服务层：控制平面组件
pub use services::conflict::{ConflictDetector, EnvScanner, ShellEnvScanner};
pub use services::control::{ControlPlane, UserNotifier};
pub use services::registry::ProviderService;
pub use services::sync::{ResyncNotifier, SyncBus, TrayHandle};
pub use services::takeover::{ProxyControl, TakeoverController};
pub use services::tool::{ToolAction, ToolInstallResult, ToolService, ToolVersionReport};
// 日志
pub use logging::{init_logging, LogLevel, LoggingConfig};
