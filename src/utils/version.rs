//! 版本号解析辅助

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;

/// 预编译的版本号正则
static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?)").expect("invalid version regex")
});

/// 从命令输出中提取纯版本号；提取失败时原样返回
///
/// `claude --version` 之类的输出常带前后缀（"1.2.3 (Claude Code)"、
/// "v2.0.5"），只取其中的 semver 片段。
pub fn parse_version_string(raw: &str) -> String {
    VERSION_RE
        .find(raw.trim())
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// 解析为可比较的 semver 版本
pub fn parse_semver(version: &str) -> Option<Version> {
    let captures = VERSION_RE.captures(version.trim())?;
    Version::parse(captures.get(1)?.as_str()).ok()
}

/// 已安装版本是否落后于最新版本
///
/// 未安装不算"有更新"；任一侧无法按 semver 解析时退化为字符串比较。
pub fn has_update(installed: Option<&str>, latest: &str) -> bool {
    match (installed, parse_semver(latest)) {
        (None, _) => false,
        (Some(installed_str), Some(latest_version)) => {
            if let Some(installed_version) = parse_semver(installed_str) {
                installed_version < latest_version
            } else {
                installed_str.trim() != latest.trim()
            }
        }
        (Some(installed_str), None) => installed_str.trim() != latest.trim(),
    }
}
