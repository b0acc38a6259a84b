//! 供应商持久化接口与内存实现
//!
//! 真正的存储引擎（JSON 文件、SQLite 等）由宿主应用提供；控制
//! 平面只依赖 [`ProviderStore`] 这个异步接口。`MemoryStore` 是
//! 内建实现，供嵌入方起步和测试使用。

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::data::{Result, SwitchError};
use crate::models::{AppId, Provider, ProviderSortUpdate};

/// 供应商记录的持久化接口
///
/// 每个方法都是调度上的挂起点：调用期间其他任务可能插入执行。
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// 列出某工具的全部供应商（无序）
    async fn list(&self, app: AppId) -> Result<Vec<Provider>>;

    /// 读取某工具当前选中的供应商 id
    async fn current_provider(&self, app: AppId) -> Result<Option<String>>;

    /// 写入一条新记录；id 已存在时返回 `DuplicateId`
    async fn create(&self, app: AppId, provider: &Provider) -> Result<()>;

    /// 覆盖一条已有记录；id 不存在时返回 `NotFound`
    async fn update(&self, app: AppId, provider: &Provider) -> Result<()>;

    /// 永久删除记录；若该 id 是当前选中项则一并清除选中
    async fn delete(&self, app: AppId, id: &str) -> Result<()>;

    /// 将记录从工具的 live 配置中摘除（记录本身保留）
    async fn detach_from_live_config(&self, app: AppId, id: &str) -> Result<()>;

    /// 批量重写 sort_index
    async fn update_sort_order(&self, app: AppId, updates: &[ProviderSortUpdate]) -> Result<()>;

    /// 持久化"当前选中"指针
    async fn switch_provider(&self, app: AppId, id: &str) -> Result<()>;
}

#[derive(Default)]
struct AppRecords {
    providers: HashMap<String, Provider>,
    current: Option<String>,
    /// 已摘除出 live 配置的记录 id（仅叠加模式工具会用到）
    detached: HashSet<String>,
}

/// 内存存储实现
#[derive(Default)]
pub struct MemoryStore {
    apps: RwLock<HashMap<AppId, AppRecords>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录是否已被摘除出 live 配置
    pub async fn is_detached(&self, app: AppId, id: &str) -> bool {
        let apps = self.apps.read().await;
        apps.get(&app)
            .map(|r| r.detached.contains(id))
            .unwrap_or(false)
    }

    /// 重新挂载回 live 配置
    pub async fn reattach(&self, app: AppId, id: &str) -> Result<()> {
        let mut apps = self.apps.write().await;
        let records = apps.entry(app).or_default();
        if !records.providers.contains_key(id) {
            return Err(SwitchError::not_found(app, id));
        }
        records.detached.remove(id);
        Ok(())
    }
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn list(&self, app: AppId) -> Result<Vec<Provider>> {
        let apps = self.apps.read().await;
        Ok(apps
            .get(&app)
            .map(|r| r.providers.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn current_provider(&self, app: AppId) -> Result<Option<String>> {
        let apps = self.apps.read().await;
        Ok(apps.get(&app).and_then(|r| r.current.clone()))
    }

    async fn create(&self, app: AppId, provider: &Provider) -> Result<()> {
        let mut apps = self.apps.write().await;
        let records = apps.entry(app).or_default();
        if records.providers.contains_key(&provider.id) {
            return Err(SwitchError::duplicate(app, &provider.id));
        }
        records.providers.insert(provider.id.clone(), provider.clone());
        Ok(())
    }

    async fn update(&self, app: AppId, provider: &Provider) -> Result<()> {
        let mut apps = self.apps.write().await;
        let records = apps.entry(app).or_default();
        if !records.providers.contains_key(&provider.id) {
            return Err(SwitchError::not_found(app, &provider.id));
        }
        records.providers.insert(provider.id.clone(), provider.clone());
        Ok(())
    }

    async fn delete(&self, app: AppId, id: &str) -> Result<()> {
        let mut apps = self.apps.write().await;
        let records = apps.entry(app).or_default();
        if records.providers.remove(id).is_none() {
            return Err(SwitchError::not_found(app, id));
        }
        records.detached.remove(id);
        if records.current.as_deref() == Some(id) {
            records.current = None;
        }
        Ok(())
    }

    async fn detach_from_live_config(&self, app: AppId, id: &str) -> Result<()> {
        let mut apps = self.apps.write().await;
        let records = apps.entry(app).or_default();
        if !records.providers.contains_key(id) {
            return Err(SwitchError::not_found(app, id));
        }
        records.detached.insert(id.to_string());
        Ok(())
    }

    async fn update_sort_order(&self, app: AppId, updates: &[ProviderSortUpdate]) -> Result<()> {
        let mut apps = self.apps.write().await;
        let records = apps.entry(app).or_default();
        for u in updates {
            let provider = records
                .providers
                .get_mut(&u.id)
                .ok_or_else(|| SwitchError::not_found(app, &u.id))?;
            provider.sort_index = Some(u.sort_index);
        }
        Ok(())
    }

    async fn switch_provider(&self, app: AppId, id: &str) -> Result<()> {
        let mut apps = self.apps.write().await;
        let records = apps.entry(app).or_default();
        if !records.providers.contains_key(id) {
            return Err(SwitchError::not_found(app, id));
        }
        records.current = Some(id.to_string());
        Ok(())
    }
}
