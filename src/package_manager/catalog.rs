//! 包管理器目录：按平台探测可用的包管理器及其升级命令

use super::resolver::PathResolver;
use super::types::ManagerDescriptor;
use crate::sysinfo::{OsFamily, PlatformInfo};

/// 按探测顺序保存的包管理器集合（id -> 描述）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<ManagerDescriptor>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换同 id 的条目，保持首次插入的位置
    pub fn insert(&mut self, descriptor: ManagerDescriptor) {
        match self.entries.iter_mut().find(|d| d.id == descriptor.id) {
            Some(existing) => *existing = descriptor,
            None => self.entries.push(descriptor),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ManagerDescriptor> {
        self.entries.iter().find(|d| d.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagerDescriptor> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有包管理器命令总数
    pub fn total_commands(&self) -> usize {
        self.entries.iter().map(|d| d.commands.len()).sum()
    }
}

impl FromIterator<ManagerDescriptor> for Catalog {
    fn from_iter<T: IntoIterator<Item = ManagerDescriptor>>(iter: T) -> Self {
        let mut catalog = Catalog::new();
        for d in iter {
            catalog.insert(d);
        }
        catalog
    }
}

/// 探测当前平台上可用的包管理器。每次调用都重新探测，不做缓存。
pub fn available_managers(platform: &PlatformInfo, resolver: &dyn PathResolver) -> Catalog {
    let catalog = match platform.os_family {
        OsFamily::Windows => windows_managers(resolver),
        OsFamily::MacOs => macos_managers(resolver),
        OsFamily::Linux => linux_managers(resolver),
        OsFamily::Unknown => Catalog::new(),
    };
    log::debug!(
        "{} 上检测到 {} 个包管理器: {:?}",
        platform.os_family,
        catalog.len(),
        catalog.ids()
    );
    catalog
}

fn windows_managers(resolver: &dyn PathResolver) -> Catalog {
    let mut managers = Catalog::new();
    if resolver.exists("winget") {
        managers.insert(ManagerDescriptor::new(
            "winget",
            "Windows Package Manager",
            &[&[
                "winget",
                "upgrade",
                "--all",
                "--accept-source-agreements",
                "--accept-package-agreements",
            ]],
        ));
    }
    if resolver.exists("choco") {
        managers.insert(ManagerDescriptor::new(
            "choco",
            "Chocolatey",
            &[&["choco", "upgrade", "all", "-y"]],
        ));
    }
    if resolver.exists("scoop") {
        managers.insert(ManagerDescriptor::new(
            "scoop",
            "Scoop",
            &[&["scoop", "update"], &["scoop", "update", "*"]],
        ));
    }
    managers
}

fn macos_managers(resolver: &dyn PathResolver) -> Catalog {
    let mut managers = Catalog::new();
    if resolver.exists("brew") {
        managers.insert(ManagerDescriptor::new(
            "brew",
            "Homebrew",
            &[&["brew", "update"], &["brew", "upgrade"], &["brew", "cleanup", "-s"]],
        ));
    }
    if resolver.exists("mas") {
        managers.insert(ManagerDescriptor::new(
            "mas",
            "Mac App Store",
            &[&["mas", "upgrade"]],
        ));
    }
    if resolver.exists("port") {
        managers.insert(ManagerDescriptor::new(
            "port",
            "MacPorts",
            &[&["sudo", "port", "selfupdate"], &["sudo", "port", "upgrade", "outdated"]],
        ));
    }
    managers
}

fn linux_managers(resolver: &dyn PathResolver) -> Catalog {
    let mut managers = Catalog::new();

    // 优先 apt，只有 apt-get 时退回 apt-get
    let apt = if resolver.exists("apt") {
        Some("apt")
    } else if resolver.exists("apt-get") {
        Some("apt-get")
    } else {
        None
    };
    if let Some(apt) = apt {
        managers.insert(ManagerDescriptor::new(
            "apt",
            "APT Package Manager",
            &[
                &["sudo", apt, "update"],
                &["sudo", apt, "upgrade", "-y"],
                &["sudo", apt, "autoremove", "-y"],
            ],
        ));
    }
    if resolver.exists("dnf") {
        managers.insert(ManagerDescriptor::new(
            "dnf",
            "DNF Package Manager",
            &[&["sudo", "dnf", "upgrade", "--refresh", "-y"]],
        ));
    }
    if resolver.exists("pacman") {
        managers.insert(ManagerDescriptor::new(
            "pacman",
            "Pacman Package Manager",
            &[&["sudo", "pacman", "-Syu", "--noconfirm"]],
        ));
    }
    if resolver.exists("zypper") {
        managers.insert(ManagerDescriptor::new(
            "zypper",
            "Zypper Package Manager",
            &[&["sudo", "zypper", "refresh"], &["sudo", "zypper", "update", "-y"]],
        ));
    }
    if resolver.exists("snap") {
        managers.insert(ManagerDescriptor::new(
            "snap",
            "Snap Packages",
            &[&["sudo", "snap", "refresh"]],
        ));
    }
    if resolver.exists("flatpak") {
        managers.insert(ManagerDescriptor::new(
            "flatpak",
            "Flatpak Applications",
            &[&["flatpak", "update", "-y"]],
        ));
    }
    managers
}
