//! 供应商记录数据模型
//!
//! Provider 是某个工具的一份命名凭证/端点配置。记录归属于所在
//! 工具的注册表，`id` 创建后不可变；`settings_config` 是按工具
//! 解释的不透明配置块。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{Result, SwitchError};
use crate::models::AppId;

/// 供应商记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    pub name: String,
    /// 工具相关的配置块，控制平面不解释其内容
    pub settings_config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_color: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 创建供应商时的提交数据
///
/// `id` 只有叠加模式工具允许调用方指定（人类可读的键），
/// 其余工具由注册表生成。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub settings_config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_color: Option<String>,
}

impl ProviderDraft {
    /// 校验提交数据：名称非空、website_url 必须是合法 URL
    pub fn validate(&self, app: AppId) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SwitchError::InvalidDraft("供应商名称不能为空".to_string()));
        }
        if let Some(url) = &self.website_url {
            url::Url::parse(url)
                .map_err(|e| SwitchError::InvalidDraft(format!("website_url 无效: {e}")))?;
        }
        if self.id.is_some() && !app.is_additive() {
            return Err(SwitchError::InvalidDraft(format!(
                "{app} 不支持自定义供应商 ID"
            )));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(SwitchError::InvalidDraft("供应商 ID 不能为空".to_string()));
            }
        }
        Ok(())
    }

    /// 以给定 id 物化为完整记录
    pub fn into_provider(self, id: String) -> Provider {
        Provider {
            id,
            name: self.name,
            settings_config: self.settings_config,
            website_url: self.website_url,
            category: self.category,
            sort_index: self.sort_index,
            meta: self.meta,
            icon: self.icon,
            icon_color: self.icon_color,
            created_at: Utc::now(),
        }
    }
}

/// 持久化层排序重编号的最小单元
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSortUpdate {
    pub id: String,
    pub sort_index: u32,
}

/// 掩码后的密钥预览（前 4 位 + 后 4 位），用于展示层
pub fn mask_api_key(key: &str) -> String {
    if key.len() <= 8 {
        return "****".to_string();
    }
    let prefix = &key[..4];
    let suffix = &key[key.len() - 4..];
    format!("{}...{}", prefix, suffix)
}

/// 展示顺序：有 sort_index 的按升序在前，其余按插入顺序排在后面
pub fn sort_for_display(providers: &mut Vec<Provider>) {
    providers.sort_by(|a, b| match (a.sort_index, b.sort_index) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(name: &str) -> ProviderDraft {
        ProviderDraft {
            name: name.to_string(),
            settings_config: json!({"env": {"ANTHROPIC_AUTH_TOKEN": "sk-test"}}),
            ..Default::default()
        }
    }

    #[test]
    fn test_draft_validation() {
        assert!(draft("主力").validate(AppId::Claude).is_ok());
        assert!(draft("  ").validate(AppId::Claude).is_err());

        let mut bad_url = draft("x");
        bad_url.website_url = Some("not a url".to_string());
        assert!(bad_url.validate(AppId::Claude).is_err());

        let mut with_id = draft("x");
        with_id.id = Some("my-key".to_string());
        // 自定义 ID 只有叠加模式工具允许
        assert!(with_id.validate(AppId::Claude).is_err());
        assert!(with_id.validate(AppId::OpenCode).is_ok());
    }

    #[test]
    fn test_into_provider_keeps_config() {
        let p = draft("主力").into_provider("p-1".to_string());
        assert_eq!(p.id, "p-1");
        assert_eq!(p.settings_config["env"]["ANTHROPIC_AUTH_TOKEN"], "sk-test");
    }

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("short"), "****");
        assert_eq!(mask_api_key("sk-abcdefgh1234"), "sk-a...1234");
    }

    #[test]
    fn test_sort_for_display() {
        let mk = |id: &str, si: Option<u32>| Provider {
            id: id.to_string(),
            name: id.to_string(),
            settings_config: json!({}),
            website_url: None,
            category: None,
            sort_index: si,
            meta: None,
            icon: None,
            icon_color: None,
            created_at: Utc::now(),
        };
        let mut v = vec![mk("c", None), mk("b", Some(5)), mk("a", Some(1))];
        sort_for_display(&mut v);
        let ids: Vec<_> = v.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_serde_camel_case() {
        let p = draft("x").into_provider("p".to_string());
        let s = serde_json::to_string(&p).unwrap();
        assert!(s.contains("settingsConfig"));
        assert!(s.contains("createdAt"));
        assert!(!s.contains("websiteUrl"), "None 字段不应序列化");
    }
}
