//! 供应商注册表服务
//!
//! 每个工具一份注册表：供应商记录 + 当前选中指针。服务内部维护
//! 一份内存镜像，所有变更先写持久化层再提交镜像；持久化失败时
//! 镜像保持不变。
//!
//! 复制操作是唯一需要两次先后依赖的持久化调用的操作
//! （先重编号、后插入）：重编号失败直接中止；插入失败会尝试
//! 反向重编号补偿，补偿失败只记日志。

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::data::{ProviderStore, Result, SwitchError};
use crate::models::{sort_for_display, AppId, Provider, ProviderDraft, ProviderSortUpdate};

#[derive(Default)]
struct RegistryView {
    providers: HashMap<String, Provider>,
    current: Option<String>,
    loaded: bool,
}

/// 供应商注册表服务
pub struct ProviderService {
    store: Arc<dyn ProviderStore>,
    apps: RwLock<HashMap<AppId, RegistryView>>,
}

impl ProviderService {
    pub fn new(store: Arc<dyn ProviderStore>) -> Self {
        Self {
            store,
            apps: RwLock::new(HashMap::new()),
        }
    }

    /// 首次访问时从持久化层装载镜像
    async fn ensure_loaded(&self, app: AppId) -> Result<()> {
        {
            let apps = self.apps.read().await;
            if apps.get(&app).map(|v| v.loaded).unwrap_or(false) {
                return Ok(());
            }
        }
        self.reload(app).await.map(|_| ())
    }

    /// 丢弃镜像并重新从持久化层装载，返回展示顺序的列表
    pub async fn reload(&self, app: AppId) -> Result<Vec<Provider>> {
        let providers = self.store.list(app).await?;
        let current = self.store.current_provider(app).await?;

        let mut apps = self.apps.write().await;
        let view = apps.entry(app).or_default();
        view.providers = providers
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();
        view.current = current;
        view.loaded = true;

        let mut list = providers;
        Self::order(&mut list);
        Ok(list)
    }

    fn order(list: &mut Vec<Provider>) {
        // 镜像来自 HashMap，先按 (created_at, id) 固定未排序记录的相对顺序
        list.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        sort_for_display(list);
    }

    /// 展示顺序的供应商列表
    pub async fn list(&self, app: AppId) -> Result<Vec<Provider>> {
        self.ensure_loaded(app).await?;
        let apps = self.apps.read().await;
        let mut list: Vec<Provider> = apps
            .get(&app)
            .map(|v| v.providers.values().cloned().collect())
            .unwrap_or_default();
        Self::order(&mut list);
        Ok(list)
    }

    pub async fn get(&self, app: AppId, id: &str) -> Result<Provider> {
        self.ensure_loaded(app).await?;
        let apps = self.apps.read().await;
        apps.get(&app)
            .and_then(|v| v.providers.get(id))
            .cloned()
            .ok_or_else(|| SwitchError::not_found(app, id))
    }

    /// 当前选中的供应商 id（用户意图，不等于实际路由目标）
    pub async fn current_provider_id(&self, app: AppId) -> Result<Option<String>> {
        self.ensure_loaded(app).await?;
        let apps = self.apps.read().await;
        Ok(apps.get(&app).and_then(|v| v.current.clone()))
    }

    /// 新建供应商：先落库，成功后提交镜像并返回存储的记录
    pub async fn add(&self, app: AppId, draft: ProviderDraft) -> Result<Provider> {
        draft.validate(app)?;
        self.ensure_loaded(app).await?;

        let id = match &draft.id {
            Some(id) => {
                let apps = self.apps.read().await;
                if apps
                    .get(&app)
                    .map(|v| v.providers.contains_key(id))
                    .unwrap_or(false)
                {
                    return Err(SwitchError::duplicate(app, id));
                }
                id.clone()
            }
            None => Uuid::new_v4().to_string(),
        };

        let provider = draft.into_provider(id);
        self.store.create(app, &provider).await?;

        let mut apps = self.apps.write().await;
        apps.entry(app)
            .or_default()
            .providers
            .insert(provider.id.clone(), provider.clone());

        tracing::info!(app = %app, id = %provider.id, "新建供应商");
        Ok(provider)
    }

    /// 更新已有记录；id 不存在时报错且状态不变
    pub async fn update(&self, app: AppId, provider: Provider) -> Result<Provider> {
        if let Some(url) = &provider.website_url {
            url::Url::parse(url)
                .map_err(|e| SwitchError::InvalidDraft(format!("website_url 无效: {e}")))?;
        }
        self.ensure_loaded(app).await?;
        {
            let apps = self.apps.read().await;
            if !apps
                .get(&app)
                .map(|v| v.providers.contains_key(&provider.id))
                .unwrap_or(false)
            {
                return Err(SwitchError::not_found(app, &provider.id));
            }
        }

        self.store.update(app, &provider).await?;

        let mut apps = self.apps.write().await;
        apps.entry(app)
            .or_default()
            .providers
            .insert(provider.id.clone(), provider.clone());
        Ok(provider)
    }

    /// 永久删除；被删记录是当前选中项时一并清除选中指针，
    /// 该工具进入"无当前供应商"状态直到下一次选择
    pub async fn delete(&self, app: AppId, id: &str) -> Result<()> {
        self.ensure_loaded(app).await?;
        {
            let apps = self.apps.read().await;
            if !apps
                .get(&app)
                .map(|v| v.providers.contains_key(id))
                .unwrap_or(false)
            {
                return Err(SwitchError::not_found(app, id));
            }
        }

        self.store.delete(app, id).await?;

        let mut apps = self.apps.write().await;
        let view = apps.entry(app).or_default();
        view.providers.remove(id);
        if view.current.as_deref() == Some(id) {
            view.current = None;
            tracing::info!(app = %app, id = %id, "删除了当前选中的供应商，选中指针已清除");
        }
        Ok(())
    }

    /// 从 live 配置中摘除（仅叠加模式工具）；记录保留，可再挂载
    pub async fn detach_from_live_config(&self, app: AppId, id: &str) -> Result<()> {
        if !app.is_additive() {
            return Err(SwitchError::AdditiveOnly { app });
        }
        self.ensure_loaded(app).await?;
        {
            let apps = self.apps.read().await;
            if !apps
                .get(&app)
                .map(|v| v.providers.contains_key(id))
                .unwrap_or(false)
            {
                return Err(SwitchError::not_found(app, id));
            }
        }
        self.store.detach_from_live_config(app, id).await
    }

    /// 设置当前选中的供应商
    pub async fn set_current(&self, app: AppId, id: &str) -> Result<()> {
        self.ensure_loaded(app).await?;
        {
            let apps = self.apps.read().await;
            if !apps
                .get(&app)
                .map(|v| v.providers.contains_key(id))
                .unwrap_or(false)
            {
                return Err(SwitchError::not_found(app, id));
            }
        }

        self.store.switch_provider(app, id).await?;

        let mut apps = self.apps.write().await;
        apps.entry(app).or_default().current = Some(id.to_string());
        Ok(())
    }

    /// 叠加模式工具的复制 id：`-copy`、`-copy-2`、`-copy-3`…直到无冲突
    fn derive_copy_id(existing: &HashMap<String, Provider>, source_id: &str) -> String {
        let base = format!("{source_id}-copy");
        if !existing.contains_key(&base) {
            return base;
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{source_id}-copy-{n}");
            if !existing.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// 深拷贝一条记录
    ///
    /// 源记录有 sort_index 时：新记录取 source+1，其余 >= 该值的
    /// 记录先整体 +1 重编号、后插入。重编号失败即中止
    /// （`SortUpdate`，不插入）；插入失败则反向重编号补偿。
    pub async fn duplicate(&self, app: AppId, source_id: &str) -> Result<Provider> {
        self.ensure_loaded(app).await?;

        let (source, new_id) = {
            let apps = self.apps.read().await;
            let view = apps
                .get(&app)
                .ok_or_else(|| SwitchError::not_found(app, source_id))?;
            let source = view
                .providers
                .get(source_id)
                .cloned()
                .ok_or_else(|| SwitchError::not_found(app, source_id))?;
            let new_id = if app.is_additive() {
                Self::derive_copy_id(&view.providers, source_id)
            } else {
                Uuid::new_v4().to_string()
            };
            (source, new_id)
        };

        // 第一阶段：重编号让出 source+1 的位置
        let mut shifted: Vec<ProviderSortUpdate> = Vec::new();
        if let Some(si) = source.sort_index {
            let new_si = si + 1;
            let apps = self.apps.read().await;
            if let Some(view) = apps.get(&app) {
                shifted = view
                    .providers
                    .values()
                    .filter(|p| p.id != source.id)
                    .filter_map(|p| {
                        p.sort_index.filter(|x| *x >= new_si).map(|x| ProviderSortUpdate {
                            id: p.id.clone(),
                            sort_index: x + 1,
                        })
                    })
                    .collect();
            }
            drop(apps);

            if !shifted.is_empty() {
                self.store
                    .update_sort_order(app, &shifted)
                    .await
                    .map_err(|e| SwitchError::SortUpdate(e.to_string()))?;

                let mut apps = self.apps.write().await;
                if let Some(view) = apps.get_mut(&app) {
                    for u in &shifted {
                        if let Some(p) = view.providers.get_mut(&u.id) {
                            p.sort_index = Some(u.sort_index);
                        }
                    }
                }
            }
        }

        let duplicated = Provider {
            id: new_id,
            name: format!("{} copy", source.name),
            settings_config: source.settings_config.clone(),
            website_url: source.website_url.clone(),
            category: source.category.clone(),
            sort_index: source.sort_index.map(|si| si + 1),
            meta: source.meta.clone(),
            icon: source.icon.clone(),
            icon_color: source.icon_color.clone(),
            created_at: chrono::Utc::now(),
        };

        // 第二阶段：插入；失败时补偿第一阶段的重编号
        if let Err(e) = self.store.create(app, &duplicated).await {
            if !shifted.is_empty() {
                let revert: Vec<ProviderSortUpdate> = shifted
                    .iter()
                    .map(|u| ProviderSortUpdate {
                        id: u.id.clone(),
                        sort_index: u.sort_index - 1,
                    })
                    .collect();
                match self.store.update_sort_order(app, &revert).await {
                    Ok(()) => {
                        let mut apps = self.apps.write().await;
                        if let Some(view) = apps.get_mut(&app) {
                            for u in &revert {
                                if let Some(p) = view.providers.get_mut(&u.id) {
                                    p.sort_index = Some(u.sort_index);
                                }
                            }
                        }
                        tracing::warn!(app = %app, source = %source_id, "插入失败，重编号已回退");
                    }
                    Err(revert_err) => {
                        tracing::error!(
                            app = %app,
                            source = %source_id,
                            error = %revert_err,
                            "插入失败且重编号回退失败，排序处于偏移状态"
                        );
                    }
                }
            }
            return Err(e);
        }

        let mut apps = self.apps.write().await;
        apps.entry(app)
            .or_default()
            .providers
            .insert(duplicated.id.clone(), duplicated.clone());

        tracing::info!(app = %app, source = %source_id, id = %duplicated.id, "复制供应商");
        Ok(duplicated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn draft(name: &str) -> ProviderDraft {
        ProviderDraft {
            name: name.to_string(),
            settings_config: json!({"env": {}}),
            ..Default::default()
        }
    }

    fn draft_with_sort(name: &str, si: u32) -> ProviderDraft {
        ProviderDraft {
            sort_index: Some(si),
            ..draft(name)
        }
    }

    fn service() -> ProviderService {
        ProviderService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_add_assigns_unique_ids() {
        let svc = service();
        let a = svc.add(AppId::Claude, draft("a")).await.unwrap();
        let b = svc.add(AppId::Claude, draft("b")).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_add_rejects_colliding_custom_id() {
        let svc = service();
        let mut d = draft("第一个");
        d.id = Some("anthropic".to_string());
        svc.add(AppId::OpenCode, d.clone()).await.unwrap();

        let err = svc.add(AppId::OpenCode, d).await.unwrap_err();
        assert!(matches!(err, SwitchError::DuplicateId { .. }));
    }

    #[tokio::test]
    async fn test_update_unknown_provider() {
        let svc = service();
        let ghost = draft("ghost").into_provider("nope".to_string());
        let err = svc.update(AppId::Claude, ghost).await.unwrap_err();
        assert!(matches!(err, SwitchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_current_clears_pointer() {
        let svc = service();
        let p = svc.add(AppId::Claude, draft("a")).await.unwrap();
        svc.set_current(AppId::Claude, &p.id).await.unwrap();

        svc.delete(AppId::Claude, &p.id).await.unwrap();
        assert_eq!(svc.current_provider_id(AppId::Claude).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_other_keeps_pointer() {
        let svc = service();
        let a = svc.add(AppId::Claude, draft("a")).await.unwrap();
        let b = svc.add(AppId::Claude, draft("b")).await.unwrap();
        svc.set_current(AppId::Claude, &a.id).await.unwrap();

        svc.delete(AppId::Claude, &b.id).await.unwrap();
        assert_eq!(
            svc.current_provider_id(AppId::Claude).await.unwrap(),
            Some(a.id)
        );
    }

    #[tokio::test]
    async fn test_set_current_unknown() {
        let svc = service();
        let err = svc.set_current(AppId::Gemini, "ghost").await.unwrap_err();
        assert!(matches!(err, SwitchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_detach_only_for_additive_apps() {
        let svc = service();
        let p = svc.add(AppId::Claude, draft("a")).await.unwrap();
        let err = svc
            .detach_from_live_config(AppId::Claude, &p.id)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::AdditiveOnly { .. }));

        let mut d = draft("oc");
        d.id = Some("anthropic".to_string());
        svc.add(AppId::OpenCode, d).await.unwrap();
        svc.detach_from_live_config(AppId::OpenCode, "anthropic")
            .await
            .unwrap();
        // 摘除后记录仍然可见
        assert_eq!(svc.list(AppId::OpenCode).await.unwrap().len(), 1);
    }

    /// 注册表 {A: 0, B: 1}，复制 A 得到 sort_index 1 的副本，B 顺延为 2
    #[tokio::test]
    async fn test_duplicate_shifts_sort_indices() {
        let svc = service();
        let a = svc.add(AppId::Claude, draft_with_sort("A", 0)).await.unwrap();
        let b = svc.add(AppId::Claude, draft_with_sort("B", 1)).await.unwrap();

        let copy = svc.duplicate(AppId::Claude, &a.id).await.unwrap();
        assert_eq!(copy.sort_index, Some(1));
        assert_eq!(copy.name, "A copy");

        let list = svc.list(AppId::Claude).await.unwrap();
        assert_eq!(list.len(), 3);
        let b_after = list.iter().find(|p| p.id == b.id).unwrap();
        assert_eq!(b_after.sort_index, Some(2));

        // sort_index 仍然两两不同
        let mut indices: Vec<u32> = list.iter().filter_map(|p| p.sort_index).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_without_sort_index() {
        let svc = service();
        let a = svc.add(AppId::Claude, draft("A")).await.unwrap();
        let copy = svc.duplicate(AppId::Claude, &a.id).await.unwrap();
        assert_eq!(copy.sort_index, None);
        assert_eq!(copy.settings_config, a.settings_config);
        assert_ne!(copy.id, a.id);
    }

    #[tokio::test]
    async fn test_duplicate_additive_derives_copy_ids() {
        let svc = service();
        let mut d = draft("oc");
        d.id = Some("anthropic".to_string());
        svc.add(AppId::OpenCode, d).await.unwrap();

        let first = svc.duplicate(AppId::OpenCode, "anthropic").await.unwrap();
        assert_eq!(first.id, "anthropic-copy");
        let second = svc.duplicate(AppId::OpenCode, "anthropic").await.unwrap();
        assert_eq!(second.id, "anthropic-copy-2");
        let third = svc.duplicate(AppId::OpenCode, "anthropic").await.unwrap();
        assert_eq!(third.id, "anthropic-copy-3");
    }

    /// 重编号失败：中止复制，不插入新记录
    struct FailSortStore {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ProviderStore for FailSortStore {
        async fn list(&self, app: AppId) -> crate::data::Result<Vec<Provider>> {
            self.inner.list(app).await
        }
        async fn current_provider(&self, app: AppId) -> crate::data::Result<Option<String>> {
            self.inner.current_provider(app).await
        }
        async fn create(&self, app: AppId, p: &Provider) -> crate::data::Result<()> {
            self.inner.create(app, p).await
        }
        async fn update(&self, app: AppId, p: &Provider) -> crate::data::Result<()> {
            self.inner.update(app, p).await
        }
        async fn delete(&self, app: AppId, id: &str) -> crate::data::Result<()> {
            self.inner.delete(app, id).await
        }
        async fn detach_from_live_config(&self, app: AppId, id: &str) -> crate::data::Result<()> {
            self.inner.detach_from_live_config(app, id).await
        }
        async fn update_sort_order(
            &self,
            app: AppId,
            updates: &[ProviderSortUpdate],
        ) -> crate::data::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SwitchError::Persistence("updateSortOrder 失败".to_string()));
            }
            self.inner.update_sort_order(app, updates).await
        }
        async fn switch_provider(&self, app: AppId, id: &str) -> crate::data::Result<()> {
            self.inner.switch_provider(app, id).await
        }
    }

    #[tokio::test]
    async fn test_duplicate_aborts_when_renumber_fails() {
        let store = Arc::new(FailSortStore {
            inner: MemoryStore::new(),
            fail: AtomicBool::new(false),
        });
        let svc = ProviderService::new(store.clone());
        let a = svc.add(AppId::Claude, draft_with_sort("A", 0)).await.unwrap();
        svc.add(AppId::Claude, draft_with_sort("B", 1)).await.unwrap();

        store.fail.store(true, Ordering::SeqCst);
        let err = svc.duplicate(AppId::Claude, &a.id).await.unwrap_err();
        assert!(matches!(err, SwitchError::SortUpdate(_)));

        // 没有插入任何新记录
        store.fail.store(false, Ordering::SeqCst);
        assert_eq!(svc.list(AppId::Claude).await.unwrap().len(), 2);
    }

    /// 插入失败：反向重编号补偿，排序恢复原状
    struct FailCreateStore {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ProviderStore for FailCreateStore {
        async fn list(&self, app: AppId) -> crate::data::Result<Vec<Provider>> {
            self.inner.list(app).await
        }
        async fn current_provider(&self, app: AppId) -> crate::data::Result<Option<String>> {
            self.inner.current_provider(app).await
        }
        async fn create(&self, app: AppId, p: &Provider) -> crate::data::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SwitchError::Persistence("createProvider 失败".to_string()));
            }
            self.inner.create(app, p).await
        }
        async fn update(&self, app: AppId, p: &Provider) -> crate::data::Result<()> {
            self.inner.update(app, p).await
        }
        async fn delete(&self, app: AppId, id: &str) -> crate::data::Result<()> {
            self.inner.delete(app, id).await
        }
        async fn detach_from_live_config(&self, app: AppId, id: &str) -> crate::data::Result<()> {
            self.inner.detach_from_live_config(app, id).await
        }
        async fn update_sort_order(
            &self,
            app: AppId,
            updates: &[ProviderSortUpdate],
        ) -> crate::data::Result<()> {
            self.inner.update_sort_order(app, updates).await
        }
        async fn switch_provider(&self, app: AppId, id: &str) -> crate::data::Result<()> {
            self.inner.switch_provider(app, id).await
        }
    }

    #[tokio::test]
    async fn test_duplicate_compensates_when_insert_fails() {
        let store = Arc::new(FailCreateStore {
            inner: MemoryStore::new(),
            fail: AtomicBool::new(false),
        });
        let svc = ProviderService::new(store.clone());
        let a = svc.add(AppId::Claude, draft_with_sort("A", 0)).await.unwrap();
        let b = svc.add(AppId::Claude, draft_with_sort("B", 1)).await.unwrap();

        store.fail.store(true, Ordering::SeqCst);
        let err = svc.duplicate(AppId::Claude, &a.id).await.unwrap_err();
        assert!(matches!(err, SwitchError::Persistence(_)));
        store.fail.store(false, Ordering::SeqCst);

        // 补偿后 B 的 sort_index 恢复为 1，记录数不变
        let list = svc.list(AppId::Claude).await.unwrap();
        assert_eq!(list.len(), 2);
        let b_after = list.iter().find(|p| p.id == b.id).unwrap();
        assert_eq!(b_after.sort_index, Some(1));
    }
}
