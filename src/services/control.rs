//! 控制平面组合根
//!
//! 把注册表、接管控制器、冲突检测器和同步总线接成一条切换链路：
//! 注册表提交 → 接管控制器重算实际路由目标 → 总线通知观察者 →
//! 外部协作方（托盘、缓存）刷新。
//!
//! 同一工具连续发出的切换不做串行化；每次切换是一个带序号的
//! 命令对象，完成时序号已不是该工具最新的命令只标记为
//! Superseded、不产生任何下游效果，避免把过期结果盖在新状态上。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::data::{ProviderStore, Result};
use crate::models::{
    AppId, ConflictBannerState, ProviderSwitchEvent, SwitchCommand, SwitchState, TakeoverSummary,
};
use crate::services::conflict::{ConflictDetector, EnvScanner};
use crate::services::registry::ProviderService;
use crate::services::sync::{ResyncNotifier, SyncBus, TrayHandle};
use crate::services::takeover::{ProxyControl, TakeoverController};

/// 非阻塞的用户通知接口（外部协作方）
///
/// 所有用户可见的失败都从这里走，不允许阻塞或抛出。
#[async_trait]
pub trait UserNotifier: Send + Sync {
    async fn notify_error(&self, message: &str);
}

#[derive(Default)]
struct SwitchLog {
    next_seq: u64,
    /// 每个工具最新一次切换的序号
    latest: HashMap<AppId, u64>,
    commands: Vec<SwitchCommand>,
}

/// 控制平面
pub struct ControlPlane {
    registry: Arc<ProviderService>,
    takeover: Arc<TakeoverController>,
    conflicts: Arc<ConflictDetector>,
    sync: Arc<SyncBus>,
    proxy: Arc<dyn ProxyControl>,
    resync: Arc<dyn ResyncNotifier>,
    tray: Arc<dyn TrayHandle>,
    notifier: Arc<dyn UserNotifier>,
    events: broadcast::Sender<ProviderSwitchEvent>,
    switches: Mutex<SwitchLog>,
}

impl ControlPlane {
    pub fn new(
        store: Arc<dyn ProviderStore>,
        proxy: Arc<dyn ProxyControl>,
        scanner: Arc<dyn EnvScanner>,
        resync: Arc<dyn ResyncNotifier>,
        tray: Arc<dyn TrayHandle>,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        let registry = Arc::new(ProviderService::new(store));
        let takeover = Arc::new(TakeoverController::new(proxy.clone()));
        let conflicts = Arc::new(ConflictDetector::new(scanner));
        let sync = Arc::new(SyncBus::new(registry.clone(), tray.clone()));
        let (events, _) = broadcast::channel(64);

        Self {
            registry,
            takeover,
            conflicts,
            sync,
            proxy,
            resync,
            tray,
            notifier,
            events,
            switches: Mutex::new(SwitchLog::default()),
        }
    }

    /// 启动期初始化：全量冲突扫描、首次代理状态刷新、订阅建立。
    /// 每一步失败都只记日志，不阻止控制平面进入可用状态。
    pub async fn startup(&self) {
        if let Err(e) = self.conflicts.scan_all().await {
            tracing::warn!(error = %e, "启动期冲突扫描失败");
        }
        if let Err(e) = self.takeover.refresh_status().await {
            tracing::warn!(error = %e, "启动期代理状态刷新失败");
        }
        self.sync.clone().start(self.proxy.as_ref(), self.resync.as_ref());
    }

    /// 切换某工具的当前供应商
    pub async fn switch_provider(&self, app: AppId, provider_id: &str) -> Result<SwitchCommand> {
        let seq = {
            let mut log = self.switches.lock().await;
            log.next_seq += 1;
            let seq = log.next_seq;
            log.latest.insert(app, seq);
            log.commands.push(SwitchCommand {
                app_id: app,
                provider_id: provider_id.to_string(),
                seq,
                state: SwitchState::Pending,
            });
            seq
        };

        // 挂起点：持久化期间同工具的新切换可能插队
        let result = self.registry.set_current(app, provider_id).await;

        let command = {
            let mut log = self.switches.lock().await;
            let state = match &result {
                Err(_) => SwitchState::Failed,
                Ok(()) if log.latest.get(&app) != Some(&seq) => SwitchState::Superseded,
                Ok(()) => SwitchState::Committed,
            };
            let cmd = log
                .commands
                .iter_mut()
                .find(|c| c.seq == seq)
                .map(|c| {
                    c.state = state;
                    c.clone()
                })
                .unwrap_or(SwitchCommand {
                    app_id: app,
                    provider_id: provider_id.to_string(),
                    seq,
                    state,
                });
            cmd
        };

        match result {
            Err(e) => {
                self.notifier
                    .notify_error(&format!("切换供应商失败: {e}"))
                    .await;
                Err(e)
            }
            Ok(()) => {
                if command.state == SwitchState::Superseded {
                    tracing::debug!(
                        app = %app,
                        provider = %provider_id,
                        seq,
                        "切换完成时已有更新的切换，跳过下游联动"
                    );
                    return Ok(command);
                }

                tracing::info!(app = %app, provider = %provider_id, "供应商切换已提交");

                if let Err(e) = self.takeover.refresh_status().await {
                    tracing::warn!(app = %app, error = %e, "切换后的代理状态刷新失败");
                }
                let _ = self.events.send(ProviderSwitchEvent {
                    app_id: app,
                    provider_id: provider_id.to_string(),
                });
                if let Err(e) = self.sync.refetch(app).await {
                    tracing::warn!(app = %app, error = %e, "切换后的视图重取失败");
                }
                if let Err(e) = self.tray.rebuild_tray_menu().await {
                    tracing::warn!(error = %e, "切换后的托盘重建失败");
                }

                Ok(command)
            }
        }
    }

    /// 活动工具变化：限定后续切换通知的刷新范围，并做一次增量冲突扫描
    pub async fn set_active_app(&self, app: AppId) {
        self.sync.set_active_app(Some(app)).await;
        if let Err(e) = self.conflicts.scan(app).await {
            tracing::warn!(app = %app, error = %e, "活动工具的冲突扫描失败");
        }
    }

    /// 对外暴露的切换事件流
    pub fn subscribe_switch_events(&self) -> broadcast::Receiver<ProviderSwitchEvent> {
        self.events.subscribe()
    }

    /// 某工具的切换命令历史（含 Pending/Superseded）
    pub async fn commands(&self, app: AppId) -> Vec<SwitchCommand> {
        self.switches
            .lock()
            .await
            .commands
            .iter()
            .filter(|c| c.app_id == app)
            .cloned()
            .collect()
    }

    pub async fn banner_state(&self) -> ConflictBannerState {
        self.conflicts.banner_state().await
    }

    pub async fn takeover_summary(&self) -> TakeoverSummary {
        self.takeover.summary().await
    }

    pub fn registry(&self) -> &Arc<ProviderService> {
        &self.registry
    }

    pub fn takeover(&self) -> &Arc<TakeoverController> {
        &self.takeover
    }

    pub fn conflicts(&self) -> &Arc<ConflictDetector> {
        &self.conflicts
    }

    pub fn sync_bus(&self) -> &Arc<SyncBus> {
        &self.sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MemoryStore, SwitchError};
    use crate::models::{EnvConflict, Provider, ProviderDraft, ProviderSortUpdate, ProxyStatus};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    struct FakeProxy;

    #[async_trait]
    impl ProxyControl for FakeProxy {
        async fn get_status(&self) -> Result<ProxyStatus> {
            Ok(ProxyStatus::default())
        }
        async fn set_takeover(&self, _: AppId, _: bool) -> Result<()> {
            Ok(())
        }
        async fn set_failover(&self, _: AppId, _: bool) -> Result<()> {
            Ok(())
        }
        fn subscribe_switch_events(&self) -> Result<broadcast::Receiver<ProviderSwitchEvent>> {
            let (tx, rx) = broadcast::channel(8);
            Box::leak(Box::new(tx));
            Ok(rx)
        }
    }

    struct FakeScanner;

    #[async_trait]
    impl EnvScanner for FakeScanner {
        async fn scan_conflicts(&self, _: Option<AppId>) -> Result<Vec<EnvConflict>> {
            Ok(Vec::new())
        }
        async fn delete_conflicting_var(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FakeResync;

    impl ResyncNotifier for FakeResync {
        fn subscribe_global_resync(&self) -> Result<broadcast::Receiver<()>> {
            let (tx, rx) = broadcast::channel(8);
            Box::leak(Box::new(tx));
            Ok(rx)
        }
    }

    struct FakeTray {
        rebuilds: AtomicUsize,
    }

    #[async_trait]
    impl TrayHandle for FakeTray {
        async fn rebuild_tray_menu(&self) -> Result<()> {
            self.rebuilds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UserNotifier for RecordingNotifier {
        async fn notify_error(&self, message: &str) {
            self.messages.lock().await.push(message.to_string());
        }
    }

    /// switch_provider 调用在信号量上排队的存储，用于构造交错
    struct GatedStore {
        inner: MemoryStore,
        gate: Semaphore,
    }

    #[async_trait]
    impl ProviderStore for GatedStore {
        async fn list(&self, app: AppId) -> Result<Vec<Provider>> {
            self.inner.list(app).await
        }
        async fn current_provider(&self, app: AppId) -> Result<Option<String>> {
            self.inner.current_provider(app).await
        }
        async fn create(&self, app: AppId, p: &Provider) -> Result<()> {
            self.inner.create(app, p).await
        }
        async fn update(&self, app: AppId, p: &Provider) -> Result<()> {
            self.inner.update(app, p).await
        }
        async fn delete(&self, app: AppId, id: &str) -> Result<()> {
            self.inner.delete(app, id).await
        }
        async fn detach_from_live_config(&self, app: AppId, id: &str) -> Result<()> {
            self.inner.detach_from_live_config(app, id).await
        }
        async fn update_sort_order(&self, app: AppId, u: &[ProviderSortUpdate]) -> Result<()> {
            self.inner.update_sort_order(app, u).await
        }
        async fn switch_provider(&self, app: AppId, id: &str) -> Result<()> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| SwitchError::Persistence(e.to_string()))?;
            permit.forget();
            self.inner.switch_provider(app, id).await
        }
    }

    fn draft(name: &str) -> ProviderDraft {
        ProviderDraft {
            name: name.to_string(),
            settings_config: json!({}),
            ..Default::default()
        }
    }

    fn plane_with_store(store: Arc<dyn ProviderStore>) -> (Arc<ControlPlane>, Arc<FakeTray>, Arc<RecordingNotifier>) {
        let tray = Arc::new(FakeTray {
            rebuilds: AtomicUsize::new(0),
        });
        let notifier = Arc::new(RecordingNotifier {
            messages: Mutex::new(Vec::new()),
        });
        let plane = Arc::new(ControlPlane::new(
            store,
            Arc::new(FakeProxy),
            Arc::new(FakeScanner),
            Arc::new(FakeResync),
            tray.clone(),
            notifier.clone(),
        ));
        (plane, tray, notifier)
    }

    #[tokio::test]
    async fn test_switch_commits_and_fans_out() {
        let (plane, tray, _) = plane_with_store(Arc::new(MemoryStore::new()));
        let p = plane.registry().add(AppId::Claude, draft("a")).await.unwrap();

        let mut events = plane.subscribe_switch_events();
        let cmd = plane.switch_provider(AppId::Claude, &p.id).await.unwrap();

        assert_eq!(cmd.state, SwitchState::Committed);
        assert_eq!(
            plane
                .registry()
                .current_provider_id(AppId::Claude)
                .await
                .unwrap(),
            Some(p.id.clone())
        );
        let ev = events.try_recv().unwrap();
        assert_eq!(ev.app_id, AppId::Claude);
        assert_eq!(ev.provider_id, p.id);
        assert!(tray.rebuilds.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_failed_switch_notifies_without_state_change() {
        let (plane, _, notifier) = plane_with_store(Arc::new(MemoryStore::new()));

        let err = plane.switch_provider(AppId::Claude, "ghost").await.unwrap_err();
        assert!(matches!(err, SwitchError::NotFound { .. }));

        let cmds = plane.commands(AppId::Claude).await;
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].state, SwitchState::Failed);

        let messages = notifier.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("切换供应商失败"));
        // 没有事件、没有当前指针变更
        assert_eq!(
            plane
                .registry()
                .current_provider_id(AppId::Claude)
                .await
                .unwrap(),
            None
        );
    }

    /// 背靠背两次切换：先发出的那次完成时已被更新的切换取代，
    /// 不产生下游效果；后发出的那次正常提交
    #[tokio::test]
    async fn test_stale_completion_is_superseded() {
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            gate: Semaphore::new(0),
        });
        let (plane, _, _) = plane_with_store(store.clone());
        let a = plane.registry().add(AppId::Claude, draft("a")).await.unwrap();
        let b = plane.registry().add(AppId::Claude, draft("b")).await.unwrap();

        let mut events = plane.subscribe_switch_events();

        let p1 = Arc::clone(&plane);
        let a_id = a.id.clone();
        let t1 = tokio::spawn(async move { p1.switch_provider(AppId::Claude, &a_id).await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let p2 = Arc::clone(&plane);
        let b_id = b.id.clone();
        let t2 = tokio::spawn(async move { p2.switch_provider(AppId::Claude, &b_id).await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        // 两次持久化都放行
        store.gate.add_permits(2);

        let c1 = t1.await.unwrap().unwrap();
        let c2 = t2.await.unwrap().unwrap();
        assert_eq!(c1.state, SwitchState::Superseded);
        assert_eq!(c2.state, SwitchState::Committed);

        // 只有提交的那次发出事件
        let ev = events.try_recv().unwrap();
        assert_eq!(ev.provider_id, b.id);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_startup_and_active_app() {
        let (plane, _, _) = plane_with_store(Arc::new(MemoryStore::new()));
        plane.startup().await;
        assert!(!plane.sync_bus().is_degraded());

        plane.set_active_app(AppId::Codex).await;
        let banner = plane.banner_state().await;
        assert!(!banner.visible);
    }
}
