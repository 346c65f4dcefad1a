//! PackageManager 相关数据类型定义

use std::time::Duration;
use thiserror::Error;

/// 单个包管理器的描述：标识、显示名、按顺序执行的升级命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerDescriptor {
    pub id: String,
    pub display_name: String,
    pub commands: Vec<Vec<String>>,
}

impl ManagerDescriptor {
    pub fn new(id: &str, display_name: &str, commands: &[&[&str]]) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            commands: commands
                .iter()
                .map(|argv| argv.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }
}

/// 命令失败原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandFailure {
    #[error("安全检查拒绝执行: 命令包含 \"{pattern}\"")]
    Rejected { pattern: String },
    #[error("提权工具不可用: {tool}")]
    ElevationUnavailable { tool: String },
    #[error("命令超时 ({}s)", .after.as_secs())]
    Timeout { after: Duration },
    #[error("启动失败: {0}")]
    Spawn(String),
    #[error("退出码 {code}")]
    Exit { code: i32 },
    #[error("已取消")]
    Cancelled,
    #[error("命令不能为空")]
    Empty,
}

impl CommandFailure {
    /// 写入历史记录的状态字段
    pub fn status_label(&self) -> &'static str {
        match self {
            CommandFailure::Exit { .. } => "failed",
            CommandFailure::Timeout { .. } => "timeout",
            CommandFailure::Rejected { .. } => "rejected",
            CommandFailure::Cancelled => "cancelled",
            _ => "error",
        }
    }
}

/// 命令执行结果；成功与各种失败路径共用同一类型
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub failure: Option<CommandFailure>,
}

impl CommandResult {
    pub fn succeeded(stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            success: true,
            exit_code: 0,
            stdout,
            stderr,
            duration,
            failure: None,
        }
    }

    /// 未产生（或无法取得）退出码的失败，exit_code 记为 -1
    pub fn failed(failure: CommandFailure, duration: Duration) -> Self {
        let stderr = failure.to_string();
        Self {
            success: false,
            exit_code: -1,
            stdout: String::new(),
            stderr,
            duration,
            failure: Some(failure),
        }
    }

    pub fn exited(code: i32, stdout: String, stderr: String, duration: Duration) -> Self {
        if code == 0 {
            return Self::succeeded(stdout, stderr, duration);
        }
        Self {
            success: false,
            exit_code: code,
            stdout,
            stderr,
            duration,
            failure: Some(CommandFailure::Exit { code }),
        }
    }

    pub fn status_label(&self) -> &'static str {
        match &self.failure {
            None => "success",
            Some(f) => f.status_label(),
        }
    }

    /// 失败时展示给用户的简短原因：优先 stderr，其次 stdout，最后失败类型
    pub fn error_excerpt(&self, max_chars: usize) -> String {
        let pick = [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(|s| s.to_string())
            .or_else(|| self.failure.as_ref().map(|f| f.to_string()))
            .unwrap_or_else(|| "未知错误".to_string());
        super::parser::truncate_chars(&super::parser::clean_terminal_output(&pick), max_chars)
    }
}
