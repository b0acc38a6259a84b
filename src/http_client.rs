//! HTTP 客户端构建工具：统一在一个地方处理代理与超时配置。

use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// 构建一个遵循当前进程代理环境的 reqwest::Client。
/// 依次读取 HTTPS_PROXY / HTTP_PROXY / ALL_PROXY。
pub fn build_client() -> Result<Client, String> {
    let proxy_url = ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy", "ALL_PROXY"]
        .iter()
        .find_map(|k| std::env::var(k).ok())
        .filter(|v| !v.is_empty());

    let builder = Client::builder().timeout(Duration::from_secs(15));

    if let Some(proxy_url) = proxy_url {
        match reqwest::Proxy::all(&proxy_url) {
            Ok(proxy) => builder
                .proxy(proxy)
                .build()
                .map_err(|e| format!("构建 reqwest client 失败: {e}")),
            Err(e) => {
                // 为 SOCKS5 提供更友好的错误说明
                if proxy_url.starts_with("socks5") {
                    return Err(format!(
                        "SOCKS5 代理初始化失败：{e}。若需要远程 DNS 解析，建议使用 socks5h://"
                    ));
                }
                Err(format!("代理 URL 无效: {e}"))
            }
        }
    } else {
        builder
            .build()
            .map_err(|e| format!("构建 reqwest client 失败: {e}"))
    }
}

static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(|| {
    build_client().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "代理客户端构建失败，回退到直连");
        Client::new()
    })
});

/// 全局共享客户端（已包含代理配置）
pub fn get() -> &'static Client {
    &GLOBAL_CLIENT
}
