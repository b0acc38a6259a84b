//! 受管 CLI 工具定义
//!
//! 四个受支持的工具是封闭枚举：每个工具携带自己的 CLI 命令名、
//! npm 包名和会覆盖托管配置的环境变量清单。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 受支持的 CLI 工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppId {
    Claude,
    Codex,
    Gemini,
    OpenCode,
}

impl AppId {
    /// 所有受支持的工具（顺序固定，用于遍历和展示）
    pub fn all() -> [AppId; 4] {
        [AppId::Claude, AppId::Codex, AppId::Gemini, AppId::OpenCode]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppId::Claude => "claude",
            AppId::Codex => "codex",
            AppId::Gemini => "gemini",
            AppId::OpenCode => "opencode",
        }
    }

    /// 工具显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            AppId::Claude => "Claude Code",
            AppId::Codex => "Codex",
            AppId::Gemini => "Gemini CLI",
            AppId::OpenCode => "OpenCode",
        }
    }

    /// CLI 命令名（`<cmd> --version` 可执行）
    pub fn cli_command(&self) -> &'static str {
        self.as_str()
    }

    /// 对应的 npm 包名
    pub fn npm_package(&self) -> &'static str {
        match self {
            AppId::Claude => "@anthropic-ai/claude-code",
            AppId::Codex => "@openai/codex",
            AppId::Gemini => "@google/gemini-cli",
            AppId::OpenCode => "opencode-ai",
        }
    }

    /// 叠加模式：live 配置可同时容纳多个供应商，记录通过显式
    /// 挂载/摘除进出配置，而不是单槽替换。目前只有 OpenCode 如此。
    pub fn is_additive(&self) -> bool {
        matches!(self, AppId::OpenCode)
    }

    /// 会覆盖托管配置、使代理接管静默失效的环境变量
    pub fn watched_env_vars(&self) -> &'static [&'static str] {
        match self {
            AppId::Claude => &[
                "ANTHROPIC_AUTH_TOKEN",
                "ANTHROPIC_API_KEY",
                "ANTHROPIC_BASE_URL",
            ],
            AppId::Codex => &["OPENAI_API_KEY", "OPENAI_BASE_URL"],
            AppId::Gemini => &["GEMINI_API_KEY", "GOOGLE_GEMINI_BASE_URL"],
            AppId::OpenCode => &["OPENCODE_CONFIG", "OPENCODE_API_KEY"],
        }
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(AppId::Claude),
            "codex" => Ok(AppId::Codex),
            "gemini" => Ok(AppId::Gemini),
            "opencode" => Ok(AppId::OpenCode),
            other => Err(format!("未知的工具: {other}")),
        }
    }
}
