//! 可执行文件查找（只检查搜索路径，不调用程序）

use std::ffi::OsString;
use std::path::PathBuf;

/// 在搜索路径中解析可执行文件；测试中可替换为固定集合
pub trait PathResolver: Send + Sync {
    fn resolve(&self, program: &str) -> Option<PathBuf>;

    fn exists(&self, program: &str) -> bool {
        self.resolve(program).is_some()
    }
}

/// 基于 `which` 的实现，搜索路径默认取自进程环境变量 PATH
#[derive(Debug, Clone, Default)]
pub struct SystemPath {
    path: Option<OsString>,
}

impl SystemPath {
    pub fn new() -> Self {
        Self {
            path: std::env::var_os("PATH"),
        }
    }

    /// 使用指定的 PATH 值
    #[allow(dead_code)]
    pub fn with_path(path: impl Into<OsString>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

impl PathResolver for SystemPath {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        if program.is_empty() {
            return None;
        }
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        which::which_in(program, self.path.as_ref(), cwd).ok()
    }
}

/// 固定集合的解析器，按名称匹配
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct FixedPath {
    pub available: Vec<String>,
}

#[cfg(test)]
impl FixedPath {
    pub fn of(names: &[&str]) -> Self {
        Self {
            available: names.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
impl PathResolver for FixedPath {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        self.available
            .iter()
            .any(|n| n == program)
            .then(|| PathBuf::from("/usr/bin").join(program))
    }
}
