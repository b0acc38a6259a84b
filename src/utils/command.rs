//! 外部命令执行器
//!
//! GUI 进程的 PATH 往往不含用户级安装目录（npm 全局、Homebrew 等），
//! 执行前统一追加常见路径。

use std::io;
use std::process::{Command, Output};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// 命令执行结果
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandResult {
    pub fn from_output(output: Output) -> Self {
        CommandResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code(),
        }
    }

    pub fn from_error(error: io::Error) -> Self {
        CommandResult {
            success: false,
            stdout: String::new(),
            stderr: error.to_string(),
            exit_code: None,
        }
    }
}

/// 拼出增强后的 PATH
fn build_enhanced_path() -> String {
    let current = std::env::var("PATH").unwrap_or_default();
    let mut extra: Vec<std::path::PathBuf> = Vec::new();

    if let Some(home) = dirs::home_dir() {
        extra.push(home.join(".local/bin"));
        extra.push(home.join(".npm-global/bin"));
        extra.push(home.join("n/bin"));
    }

    #[cfg(target_os = "macos")]
    {
        extra.push(std::path::PathBuf::from("/opt/homebrew/bin"));
        extra.push(std::path::PathBuf::from("/usr/local/bin"));
    }

    #[cfg(target_os = "linux")]
    {
        extra.push(std::path::PathBuf::from("/usr/local/bin"));
        extra.push(std::path::PathBuf::from("/usr/bin"));
    }

    let sep = if cfg!(target_os = "windows") { ';' } else { ':' };
    let mut path = current;
    for p in extra {
        if p.exists() {
            path = format!("{}{}{}", p.display(), sep, path);
        }
    }
    path
}

/// 命令执行器
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        CommandRunner
    }

    /// 同步执行 shell 命令（使用增强的 PATH）
    pub fn execute(&self, command_str: &str) -> CommandResult {
        let enhanced_path = build_enhanced_path();

        #[cfg(target_os = "windows")]
        let output = Command::new("cmd")
            .args(["/C", command_str])
            .creation_flags(CREATE_NO_WINDOW)
            .env("PATH", enhanced_path)
            .output();

        #[cfg(not(target_os = "windows"))]
        let output = Command::new("sh")
            .args(["-c", command_str])
            .env("PATH", enhanced_path)
            .output();

        match output {
            Ok(output) => CommandResult::from_output(output),
            Err(e) => CommandResult::from_error(e),
        }
    }

    /// 异步执行（spawn_blocking，避免阻塞事件循环）
    pub async fn execute_async(&self, command_str: &str) -> CommandResult {
        let command_str = command_str.to_string();

        tokio::task::spawn_blocking(move || CommandRunner.execute(&command_str))
            .await
            .unwrap_or_else(|e| CommandResult {
                success: false,
                stdout: String::new(),
                stderr: format!("任务执行失败: {e}"),
                exit_code: None,
            })
    }
}
