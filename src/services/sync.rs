//! 跨界面同步总线
//!
//! 订阅两路事件：工具侧发起的切换通知（按工具限定）和全局
//! "供应商已重同步"信号（批量导入、外部统一之后）。职责：
//! - 活动工具的切换事件触发且只触发一次该工具的注册表重取
//! - 全局重同步使所有缓存失效、全量重取并请求托盘重建
//! - 同一工具并发的失效请求合并为一次在途取数（请求合流）
//! - 订阅建立失败记日志并进入降级模式（手动刷新仍可用）
//!
//! 消费端按事件内容去重，容忍重复与乱序投递。

use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};

use crate::data::Result;
use crate::models::{AppId, Provider, ProviderSwitchEvent};
use crate::services::registry::ProviderService;
use crate::services::takeover::ProxyControl;

/// 托盘菜单重建接口（外部协作方）
#[async_trait]
pub trait TrayHandle: Send + Sync {
    async fn rebuild_tray_menu(&self) -> Result<()>;
}

/// 全局重同步信号源（外部协作方）
pub trait ResyncNotifier: Send + Sync {
    fn subscribe_global_resync(&self) -> Result<broadcast::Receiver<()>>;
}

enum FetchRole {
    /// 自己是取数方，完成后通过 sender 放行等待者
    Fetch(watch::Sender<bool>),
    /// 已有在途取数，等它完成
    Wait(watch::Receiver<bool>),
}

/// 同步总线
pub struct SyncBus {
    registry: Arc<ProviderService>,
    tray: Arc<dyn TrayHandle>,
    cache: RwLock<HashMap<AppId, Vec<Provider>>>,
    in_flight: Mutex<HashMap<AppId, watch::Receiver<bool>>>,
    active_app: RwLock<Option<AppId>>,
    last_event: Mutex<HashMap<AppId, ProviderSwitchEvent>>,
    degraded: AtomicBool,
}

impl SyncBus {
    pub fn new(registry: Arc<ProviderService>, tray: Arc<dyn TrayHandle>) -> Self {
        Self {
            registry,
            tray,
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            active_app: RwLock::new(None),
            last_event: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
        }
    }

    /// 建立两路订阅并启动消费任务
    ///
    /// 任一订阅失败都不致命：记日志、置降级标记，切换通知不再
    /// 自动刷新视图，手动刷新不受影响。
    pub fn start(self: Arc<Self>, proxy: &dyn ProxyControl, resync: &dyn ResyncNotifier) {
        match proxy.subscribe_switch_events() {
            Ok(mut rx) => {
                let bus = Arc::clone(&self);
                tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(ev) => bus.handle_switch_event(ev).await,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!(skipped = n, "切换事件积压，跳过部分事件");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "切换事件订阅失败，降级为手动刷新");
                self.degraded.store(true, Ordering::SeqCst);
            }
        }

        match resync.subscribe_global_resync() {
            Ok(mut rx) => {
                let bus = Arc::clone(&self);
                tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(()) => bus.handle_global_resync().await,
                            Err(broadcast::error::RecvError::Lagged(_)) => {
                                // 重同步本身是全量操作，积压合并为一次即可
                                bus.handle_global_resync().await;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "全局重同步订阅失败，降级为手动刷新");
                self.degraded.store(true, Ordering::SeqCst);
            }
        }
    }

    /// 订阅是否处于降级模式
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub async fn set_active_app(&self, app: Option<AppId>) {
        *self.active_app.write().await = app;
    }

    pub async fn cached(&self, app: AppId) -> Option<Vec<Provider>> {
        self.cache.read().await.get(&app).cloned()
    }

    pub async fn invalidate(&self, app: AppId) {
        self.cache.write().await.remove(&app);
    }

    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }

    /// 重取某工具的注册表视图（请求合流）
    ///
    /// 已有在途取数时挂起等待并共享其结果；在途取数失败时等待者
    /// 自己接棒重试，错误只向真正发起取数的调用方传播。
    pub async fn refetch(&self, app: AppId) -> Result<Vec<Provider>> {
        loop {
            let role = {
                let mut in_flight = self.in_flight.lock().await;
                match in_flight.get(&app) {
                    Some(rx) => FetchRole::Wait(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(false);
                        in_flight.insert(app, rx);
                        FetchRole::Fetch(tx)
                    }
                }
            };

            match role {
                FetchRole::Wait(mut rx) => {
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                    if let Some(cached) = self.cache.read().await.get(&app) {
                        return Ok(cached.clone());
                    }
                    // 在途取数失败，重新竞争取数权
                }
                FetchRole::Fetch(tx) => {
                    let result = self.registry.reload(app).await;
                    if let Ok(list) = &result {
                        self.cache.write().await.insert(app, list.clone());
                    }
                    self.in_flight.lock().await.remove(&app);
                    let _ = tx.send(true);
                    return result;
                }
            }
        }
    }

    async fn handle_switch_event(&self, event: ProviderSwitchEvent) {
        let app = event.app_id;

        // 按事件内容去重：重复投递且缓存仍在时不再重取
        {
            let mut last = self.last_event.lock().await;
            if last.get(&app) == Some(&event) && self.cache.read().await.contains_key(&app) {
                tracing::debug!(app = %app, provider = %event.provider_id, "重复的切换事件，忽略");
                return;
            }
            last.insert(app, event.clone());
        }

        let is_active = *self.active_app.read().await == Some(app);
        if is_active {
            if let Err(e) = self.refetch(app).await {
                tracing::warn!(app = %app, error = %e, "切换事件触发的重取失败");
            }
        } else {
            // 非活动工具只作废缓存，等界面切过去时再取
            self.invalidate(app).await;
        }
    }

    async fn handle_global_resync(&self) {
        tracing::info!("收到全局重同步信号，重建所有注册表视图");
        self.invalidate_all().await;

        let results = join_all(AppId::all().map(|app| self.refetch(app))).await;
        for (app, result) in AppId::all().into_iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(app = %app, error = %e, "全量重取失败");
            }
        }

        if let Err(e) = self.tray.rebuild_tray_menu().await {
            tracing::warn!(error = %e, "托盘菜单重建失败");
        }
    }
}
