//! 切换事件与切换命令对象

use serde::{Deserialize, Serialize};

use crate::models::AppId;

/// 切换提交后对外广播的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSwitchEvent {
    pub app_id: AppId,
    pub provider_id: String,
}

/// 切换命令的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    /// 已发出，持久化尚未返回
    Pending,
    /// 已提交并完成下游联动
    Committed,
    /// 持久化失败，状态未变更
    Failed,
    /// 完成时已有更新的同工具切换，不再产生任何下游效果
    Superseded,
}

/// 一次乐观切换的显式命令对象
///
/// 完成回调只在 `seq` 仍是该工具最新一次切换时才应用下游效果，
/// 过期完成静默降级为 [`SwitchState::Superseded`]。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchCommand {
    pub app_id: AppId,
    pub provider_id: String,
    pub seq: u64,
    pub state: SwitchState,
}
