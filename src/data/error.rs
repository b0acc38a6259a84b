//! 统一错误类型定义
//!
//! 使用 `thiserror` 定义控制平面的所有错误类型。服务层返回
//! `Result<T, SwitchError>`；组合根的胶水代码按需经 `anyhow` 透传。

use std::path::PathBuf;
use thiserror::Error;

use crate::models::AppId;

/// 控制平面统一错误类型
#[derive(Error, Debug)]
pub enum SwitchError {
    /// 引用的供应商不存在
    #[error("未找到供应商: {app}/{id}")]
    NotFound { app: AppId, id: String },

    /// 创建/复制时 ID 冲突
    #[error("供应商 ID 已存在: {app}/{id}")]
    DuplicateId { app: AppId, id: String },

    /// 复制流程中排序重编号失败，未插入新记录；
    /// 已落库的重编号不会回滚（已知的不一致窗口）
    #[error("排序重编号失败: {0}")]
    SortUpdate(String),

    /// 通用存储失败
    #[error("持久化失败: {0}")]
    Persistence(String),

    /// 事件桥接建立失败；功能降级为手动刷新，不作为用户可见错误
    #[error("事件订阅失败: {0}")]
    Subscription(String),

    /// 非叠加模式工具不支持从 live 配置中摘除
    #[error("{app} 不是叠加模式工具，不支持从配置中移除")]
    AdditiveOnly { app: AppId },

    /// 提交数据非法
    #[error("无效的供应商数据: {0}")]
    InvalidDraft(String),

    /// 同一实体上已有互斥操作在进行
    #[error("操作进行中: {0}")]
    Busy(String),

    /// 文件 I/O 错误
    #[error("文件 I/O 错误: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON 序列化/反序列化错误
    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// 便于与现有代码集成的类型别名
pub type Result<T> = std::result::Result<T, SwitchError>;

impl SwitchError {
    pub fn not_found(app: AppId, id: impl Into<String>) -> Self {
        Self::NotFound { app, id: id.into() }
    }

    pub fn duplicate(app: AppId, id: impl Into<String>) -> Self {
        Self::DuplicateId { app, id: id.into() }
    }

    /// 从 `std::io::Error` 和路径创建 I/O 错误
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
