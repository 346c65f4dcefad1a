use serde::Serialize;
use std::fmt;
use std::process::Command;

/// 操作系统家族，决定探测哪一组包管理器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Windows,
    MacOs,
    Linux,
    Unknown,
}

impl OsFamily {
    /// 由 `std::env::consts::OS` 风格的系统名映射
    pub fn from_os_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "windows" => OsFamily::Windows,
            "macos" | "darwin" => OsFamily::MacOs,
            "linux" => OsFamily::Linux,
            _ => OsFamily::Unknown,
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OsFamily::Windows => "windows",
            OsFamily::MacOs => "macos",
            OsFamily::Linux => "linux",
            OsFamily::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// 平台信息，启动时探测一次，之后只读
#[derive(Debug, Clone, Serialize)]
pub struct PlatformInfo {
    pub os_family: OsFamily,
    pub distribution_label: String,
    pub architecture: String,
    pub kernel_release: String,
}

impl PlatformInfo {
    /// 自动检测平台信息；任何子步骤失败都退回通用描述，不返回错误
    pub fn detect() -> Self {
        let os_family = OsFamily::from_os_name(std::env::consts::OS);
        let distribution_label = match os_family {
            OsFamily::Linux => Self::get_linux_distro(),
            OsFamily::MacOs => Self::get_macos_version(),
            OsFamily::Windows => Self::get_windows_version(),
            OsFamily::Unknown => std::env::consts::OS.to_string(),
        };

        Self {
            os_family,
            distribution_label,
            architecture: std::env::consts::ARCH.to_string(),
            kernel_release: Self::get_kernel(os_family),
        }
    }

    /// 单行摘要，用于日志与报告
    pub fn summary(&self) -> String {
        format!(
            "{} ({}, {}, 内核 {})",
            self.distribution_label, self.os_family, self.architecture, self.kernel_release
        )
    }

    /// 序列化为 JSON，写入历史记录的 system_info 字段
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    fn run_cmd(cmd: &str, args: &[&str]) -> Option<String> {
        Command::new(cmd)
            .args(args)
            .output()
            .ok()
            .and_then(|o| {
                if o.status.success() {
                    let s = String::from_utf8_lossy(&o.stdout).trim().to_string();
                    if s.is_empty() { None } else { Some(s) }
                } else {
                    None
                }
            })
    }

    fn get_kernel(os_family: OsFamily) -> String {
        let raw = match os_family {
            OsFamily::Windows => None,
            _ => Self::run_cmd("uname", &["-r"]),
        };
        raw.unwrap_or_else(|| "unknown".to_string())
    }

    fn get_linux_distro() -> String {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| parse_pretty_name(&content))
            .unwrap_or_else(|| "Linux".to_string())
    }

    fn get_macos_version() -> String {
        match Self::run_cmd("sw_vers", &["-productVersion"]) {
            Some(version) => format!("macOS {}", version),
            None => "macOS".to_string(),
        }
    }

    fn get_windows_version() -> String {
        // `ver` 输出形如: Microsoft Windows [Version 10.0.22631.4602]
        Self::run_cmd("cmd", &["/C", "ver"])
            .and_then(|raw| {
                raw.split("Version")
                    .nth(1)
                    .map(|s| s.trim_matches(|c: char| c == ']' || c.is_whitespace()).to_string())
            })
            .filter(|v| !v.is_empty())
            .map(|v| format!("Windows {}", v))
            .unwrap_or_else(|| "Windows".to_string())
    }
}

/// 解析 os-release 内容中的第一行 PRETTY_NAME="Arch Linux"
pub fn parse_pretty_name(content: &str) -> Option<String> {
    content
        .lines()
        .find(|line| line.starts_with("PRETTY_NAME="))
        .and_then(|line| line.split_once('='))
        .map(|(_, value)| value.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|name| !name.is_empty())
}
