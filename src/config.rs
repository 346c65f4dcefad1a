use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 单条命令的超时时间（秒）
    pub command_timeout_secs: u64,
    pub history_enabled: bool,
    pub history_dir: PathBuf,
    pub save_reports: bool,
    pub report_dir: PathBuf,
    pub schedule_file: PathBuf,
    /// 定时任务轮询间隔（秒）
    pub scheduler_poll_secs: u64,
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for Config {
    fn default() -> Self {
        let home = home_dir();
        Self {
            command_timeout_secs: 600,
            history_enabled: true,
            history_dir: home.join(".lian/updater/history"),
            save_reports: true,
            report_dir: home.join(".lian/updater/reports"),
            schedule_file: home.join(".config/lian-updater/schedule_config.json"),
            scheduler_poll_secs: 60,
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        home_dir().join(".config/lian-updater/config.toml")
    }

    /// 加载配置；未指定路径时使用默认位置，文件不存在则使用默认值
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("读取配置文件失败: {}", config_path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("解析配置文件失败: {}", config_path.display()))?;
            log::debug!("已加载配置: {}", config_path.display());
            Ok(config)
        } else if path.is_some() {
            anyhow::bail!("配置文件不存在: {}", config_path.display())
        } else {
            Ok(Self::default())
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn scheduler_poll(&self) -> Duration {
        Duration::from_secs(self.scheduler_poll_secs.max(1))
    }
}
