//! 包管理器模块：探测 winget/choco/scoop、brew/mas/port、apt/dnf/pacman/zypper/snap/flatpak 并执行升级命令

pub mod catalog;
pub mod parser;
pub mod resolver;
pub mod runner;
pub mod types;

// 重新导出常用类型和函数
pub use catalog::{available_managers, Catalog};
pub use resolver::{PathResolver, SystemPath};
pub use runner::{needs_elevation, CommandRunner, SystemRunner};
pub use types::{CommandFailure, CommandResult, ManagerDescriptor};
