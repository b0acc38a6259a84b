//! 代理接管控制器
//!
//! "哪个供应商的配置实际承载着工具的出站流量"的唯一事实来源，
//! 与注册表的"当前选中"相互独立：选中是用户意图，活动目标是
//! 代理真正在路由的对象，切换提交后二者异步收敛。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::data::Result;
use crate::models::{AppId, ProviderSwitchEvent, ProxyStatus, TakeoverSummary};

/// 代理进程的控制接口（外部协作方）
///
/// 只覆盖控制信号：启停目标、接管/故障转移开关、状态查询与
/// 切换事件订阅；拦截本身的线上协议不在此接口内。
#[async_trait]
pub trait ProxyControl: Send + Sync {
    async fn get_status(&self) -> Result<ProxyStatus>;
    async fn set_takeover(&self, app: AppId, enabled: bool) -> Result<()>;
    async fn set_failover(&self, app: AppId, enabled: bool) -> Result<()>;
    /// 订阅代理侧发起的切换通知；建立失败由调用方降级处理
    fn subscribe_switch_events(&self) -> Result<broadcast::Receiver<ProviderSwitchEvent>>;
}

#[derive(Default)]
struct TakeoverState {
    status: ProxyStatus,
    takeover: HashMap<AppId, bool>,
    failover: HashMap<AppId, bool>,
}

/// 接管控制器
pub struct TakeoverController {
    proxy: Arc<dyn ProxyControl>,
    state: RwLock<TakeoverState>,
}

impl TakeoverController {
    pub fn new(proxy: Arc<dyn ProxyControl>) -> Self {
        Self {
            proxy,
            state: RwLock::new(TakeoverState::default()),
        }
    }

    /// 从代理进程拉取最新状态并替换快照
    pub async fn refresh_status(&self) -> Result<ProxyStatus> {
        let status = self.proxy.get_status().await?.normalized();
        let mut state = self.state.write().await;
        state.status = status.clone();
        Ok(status)
    }

    pub async fn status(&self) -> ProxyStatus {
        self.state.read().await.status.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.status.is_running
    }

    /// 工具当前实际路由到的供应商
    ///
    /// 代理未运行时一律返回 None（快照里的残留目标不算数），
    /// 注册表的选中指针不受影响。
    pub async fn active_provider_for(&self, app: AppId) -> Option<String> {
        let state = self.state.read().await;
        if !state.status.is_running {
            return None;
        }
        state.status.target_for(app).map(String::from)
    }

    pub async fn takeover_enabled(&self, app: AppId) -> bool {
        *self.state.read().await.takeover.get(&app).unwrap_or(&false)
    }

    pub async fn failover_enabled(&self, app: AppId) -> bool {
        *self.state.read().await.failover.get(&app).unwrap_or(&false)
    }

    /// 接管对某工具实际生效 = 代理在运行 且 该工具开关打开
    pub async fn effective_takeover(&self, app: AppId) -> bool {
        let state = self.state.read().await;
        state.status.is_running && *state.takeover.get(&app).unwrap_or(&false)
    }

    /// 切换接管开关；值未变化时不产生重复的代理重配置请求
    pub async fn set_takeover_enabled(&self, app: AppId, enabled: bool) -> Result<()> {
        {
            let state = self.state.read().await;
            if *state.takeover.get(&app).unwrap_or(&false) == enabled {
                tracing::debug!(app = %app, enabled, "接管开关值未变化，跳过");
                return Ok(());
            }
        }

        self.proxy.set_takeover(app, enabled).await?;

        let mut state = self.state.write().await;
        state.takeover.insert(app, enabled);
        tracing::info!(app = %app, enabled, "接管开关已切换");
        Ok(())
    }

    /// 切换故障转移开关
    ///
    /// 开关状态总是记录；只有接管对该工具实际生效时才下发给代理。
    pub async fn set_failover_enabled(&self, app: AppId, enabled: bool) -> Result<()> {
        let effective = {
            let state = self.state.read().await;
            if *state.failover.get(&app).unwrap_or(&false) == enabled {
                return Ok(());
            }
            state.status.is_running && *state.takeover.get(&app).unwrap_or(&false)
        };

        if effective {
            self.proxy.set_failover(app, enabled).await?;
        } else {
            tracing::debug!(app = %app, enabled, "接管未生效，故障转移只记录不下发");
        }

        let mut state = self.state.write().await;
        state.failover.insert(app, enabled);
        Ok(())
    }

    /// 展示层的收敛规则：接管生效且活动目标已知时以活动目标为准，
    /// 否则退回注册表的选中项
    pub async fn display_provider_for(&self, app: AppId, selected: Option<&str>) -> Option<String> {
        if self.effective_takeover(app).await {
            if let Some(active) = self.active_provider_for(app).await {
                return Some(active);
            }
        }
        selected.map(String::from)
    }

    /// 状态指示器用的概况
    pub async fn summary(&self) -> TakeoverSummary {
        let state = self.state.read().await;
        let mut per_app_active = HashMap::new();
        let mut per_app_failover = HashMap::new();
        for app in AppId::all() {
            let active = if state.status.is_running {
                state.status.target_for(app).map(String::from)
            } else {
                None
            };
            per_app_active.insert(app, active);
            per_app_failover.insert(app, *state.failover.get(&app).unwrap_or(&false));
        }
        TakeoverSummary {
            is_running: state.status.is_running,
            per_app_active,
            per_app_failover,
        }
    }
}
