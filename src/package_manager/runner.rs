//! 命令执行：安全检查、提权包装、超时控制

use super::resolver::PathResolver;
use super::types::{CommandFailure, CommandResult};
use crate::sysinfo::OsFamily;
use std::io;
use std::process::Output;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 明显具有破坏性的命令片段（小写匹配）。只是尽力而为的拦截，不是安全边界。
pub const DENYLIST: &[&str] = &["rm -rf", "format", "del ", "erase", "mkfs", "dd if="];

/// 超时后等待子进程退出的宽限时间
const REAP_GRACE: Duration = Duration::from_secs(1);

/// 执行单条命令；实现不得 panic，所有错误都转换为失败的 CommandResult
pub trait CommandRunner: Send + Sync {
    fn run(&self, argv: &[String], elevate: bool, timeout: Duration) -> CommandResult;
}

/// 检查拼接后的命令是否命中拒绝列表，返回命中的片段
pub fn check_denylist(argv: &[String]) -> Option<&'static str> {
    let joined = argv.join(" ").to_lowercase();
    DENYLIST.iter().copied().find(|pattern| joined.contains(pattern))
}

/// 需要提权的命令以 sudo 开头
pub fn needs_elevation(argv: &[String]) -> bool {
    argv.first().map(|s| s == "sudo").unwrap_or(false)
}

/// 提权后实际执行的程序与参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// 提权辅助程序名（pkexec / osascript），未提权时为 None
    pub helper: Option<&'static str>,
}

impl Invocation {
    fn direct(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            helper: None,
        })
    }
}

/// 按平台构造提权调用。
///
/// Linux 下去掉开头的 sudo，剩余参数原样交给 pkexec（不经过 shell）；
/// macOS 下通过 AppleScript 的 `with administrator privileges` 执行，
/// 每个参数先做 shell 单引号转义，再为 AppleScript 字符串转义反斜杠与双引号；
/// 其它平台不支持原地提权，命令原样执行。
pub fn elevated_invocation(os_family: OsFamily, argv: &[String]) -> Option<Invocation> {
    let rest = if needs_elevation(argv) { &argv[1..] } else { argv };
    match os_family {
        OsFamily::Linux => {
            if rest.is_empty() {
                return None;
            }
            Some(Invocation {
                program: "pkexec".to_string(),
                args: rest.to_vec(),
                helper: Some("pkexec"),
            })
        }
        OsFamily::MacOs => {
            if rest.is_empty() {
                return None;
            }
            let shell_cmd = rest.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ");
            let escaped = shell_cmd.replace('\\', "\\\\").replace('"', "\\\"");
            Some(Invocation {
                program: "osascript".to_string(),
                args: vec![
                    "-e".to_string(),
                    format!("do shell script \"{}\" with administrator privileges", escaped),
                ],
                helper: Some("osascript"),
            })
        }
        OsFamily::Windows | OsFamily::Unknown => Invocation::direct(argv),
    }
}

/// POSIX shell 单引号转义；只含安全字符时原样返回
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@+,%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// 基于 duct 的真实进程执行
pub struct SystemRunner {
    os_family: OsFamily,
    resolver: Arc<dyn PathResolver>,
}

impl SystemRunner {
    pub fn new(os_family: OsFamily, resolver: Arc<dyn PathResolver>) -> Self {
        Self { os_family, resolver }
    }

    fn spawn_and_wait(&self, invocation: &Invocation, timeout: Duration) -> Result<Output, CommandFailure> {
        let expr = duct::cmd(&invocation.program, &invocation.args)
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked();

        #[cfg(unix)]
        let expr = expr.before_spawn(|cmd| {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    // 独立进程组，超时时可以连同孙进程一起终止
                    libc::setpgid(0, 0);
                    #[cfg(target_os = "linux")]
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                    Ok(())
                });
            }
            Ok(())
        });

        let handle = expr.start().map_err(|e| match (e.kind(), invocation.helper) {
            (io::ErrorKind::NotFound, Some(tool)) => CommandFailure::ElevationUnavailable {
                tool: tool.to_string(),
            },
            _ => CommandFailure::Spawn(e.to_string()),
        })?;
        let handle = Arc::new(handle);

        // wait 会一直阻塞到输出管道关闭；后台孙进程持有管道时直接子进程退出也不会返回，
        // 所以放到单独线程里等待，截止时间由 recv_timeout 控制
        let (tx, rx) = mpsc::channel();
        let waiter = Arc::clone(&handle);
        std::thread::spawn(move || {
            let _ = tx.send(waiter.wait().map(|output| output.clone()));
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(CommandFailure::Spawn(e.to_string())),
            Err(RecvTimeoutError::Disconnected) => Err(CommandFailure::Spawn("等待线程异常退出".to_string())),
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "命令超时 ({}s)，终止进程组: {} {}",
                    timeout.as_secs(),
                    invocation.program,
                    invocation.args.join(" ")
                );
                terminate(&handle);
                if rx.recv_timeout(REAP_GRACE).is_err() {
                    // 等待线程持有 handle，进程退出后由它回收
                    log::warn!("子进程未在宽限期内退出，转入后台回收");
                }
                Err(CommandFailure::Timeout { after: timeout })
            }
        }
    }
}

/// 终止整个进程组。组长退出后进程组仍然存在，持有管道的孙进程也会一起收到信号。
/// 提权后的进程属于 root，普通用户无法发送信号，此时只能等它自行退出。
fn terminate(handle: &Arc<duct::Handle>) {
    #[cfg(unix)]
    for pid in handle.pids() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        // duct 的 kill 会等待子进程，不能阻塞调用方
        let killer = Arc::clone(handle);
        std::thread::spawn(move || {
            let _ = killer.kill();
        });
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String], elevate: bool, timeout: Duration) -> CommandResult {
        let start = Instant::now();

        if argv.is_empty() {
            return CommandResult::failed(CommandFailure::Empty, start.elapsed());
        }

        if let Some(pattern) = check_denylist(argv) {
            log::error!("安全检查: 拒绝执行危险命令: {}", argv.join(" "));
            return CommandResult::failed(
                CommandFailure::Rejected { pattern: pattern.to_string() },
                start.elapsed(),
            );
        }

        let invocation = if elevate {
            elevated_invocation(self.os_family, argv)
        } else {
            Invocation::direct(argv)
        };
        let Some(invocation) = invocation else {
            return CommandResult::failed(CommandFailure::Empty, start.elapsed());
        };

        if let Some(tool) = invocation.helper {
            if !self.resolver.exists(tool) {
                log::error!("提权工具 {} 不可用，跳过: {}", tool, argv.join(" "));
                return CommandResult::failed(
                    CommandFailure::ElevationUnavailable { tool: tool.to_string() },
                    start.elapsed(),
                );
            }
            log::info!("请求提权 ({}): {}", tool, argv.join(" "));
        } else {
            log::info!("执行: {}", argv.join(" "));
        }

        match self.spawn_and_wait(&invocation, timeout) {
            Ok(output) => CommandResult::exited(
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stdout).to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
                start.elapsed(),
            ),
            Err(failure) => CommandResult::failed(failure, start.elapsed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_manager::resolver::{FixedPath, SystemPath};

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn local_runner() -> SystemRunner {
        SystemRunner::new(OsFamily::Unknown, Arc::new(SystemPath::new()))
    }

    #[test]
    fn test_denylist_matches_case_insensitive() {
        assert_eq!(check_denylist(&argv(&["sh", "-c", "RM -RF /"])), Some("rm -rf"));
        assert_eq!(check_denylist(&argv(&["diskutil", "eraseDisk"])), Some("erase"));
        assert_eq!(check_denylist(&argv(&["sudo", "apt", "upgrade", "-y"])), None);
    }

    #[test]
    fn test_catalog_commands_pass_denylist() {
        for cmd in [
            argv(&["winget", "upgrade", "--all", "--accept-source-agreements", "--accept-package-agreements"]),
            argv(&["brew", "cleanup", "-s"]),
            argv(&["sudo", "pacman", "-Syu", "--noconfirm"]),
            argv(&["scoop", "update", "*"]),
        ] {
            assert_eq!(check_denylist(&cmd), None, "{cmd:?}");
        }
    }

    #[test]
    fn test_rejected_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let script = format!("touch {}; rm -rf /nonexistent-lian", marker.display());
        let result = local_runner().run(&argv(&["sh", "-c", &script]), false, Duration::from_secs(5));
        assert!(!result.success);
        assert!(matches!(result.failure, Some(CommandFailure::Rejected { .. })));
        assert!(result.stderr.contains("安全检查"));
        assert!(!marker.exists());
    }

    #[test]
    fn test_elevated_invocation_linux_uses_argv() {
        let inv = elevated_invocation(OsFamily::Linux, &argv(&["sudo", "apt", "upgrade", "-y"])).unwrap();
        assert_eq!(inv.program, "pkexec");
        assert_eq!(inv.args, argv(&["apt", "upgrade", "-y"]));
        assert_eq!(inv.helper, Some("pkexec"));
    }

    #[test]
    fn test_elevated_invocation_macos_applescript() {
        let inv = elevated_invocation(OsFamily::MacOs, &argv(&["sudo", "port", "upgrade", "outdated"])).unwrap();
        assert_eq!(inv.program, "osascript");
        assert_eq!(
            inv.args,
            argv(&["-e", "do shell script \"port upgrade outdated\" with administrator privileges"])
        );
    }

    #[test]
    fn test_elevated_invocation_macos_escapes_quotes() {
        let inv = elevated_invocation(OsFamily::MacOs, &argv(&["sudo", "echo", "say \"hi\""])).unwrap();
        assert_eq!(
            inv.args[1],
            "do shell script \"echo 'say \\\"hi\\\"'\" with administrator privileges"
        );
    }

    #[test]
    fn test_elevated_invocation_windows_passthrough() {
        let cmd = argv(&["choco", "upgrade", "all", "-y"]);
        let inv = elevated_invocation(OsFamily::Windows, &cmd).unwrap();
        assert_eq!(inv.program, "choco");
        assert_eq!(inv.args, argv(&["upgrade", "all", "-y"]));
        assert_eq!(inv.helper, None);
    }

    #[test]
    fn test_elevated_invocation_bare_sudo() {
        assert!(elevated_invocation(OsFamily::Linux, &argv(&["sudo"])).is_none());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("upgrade"), "upgrade");
        assert_eq!(shell_quote("--refresh"), "--refresh");
        assert_eq!(shell_quote("*"), "'*'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_elevation_tool_missing() {
        let runner = SystemRunner::new(OsFamily::Linux, Arc::new(FixedPath::default()));
        let result = runner.run(&argv(&["sudo", "apt", "update"]), true, Duration::from_secs(5));
        assert!(!result.success);
        assert_eq!(
            result.failure,
            Some(CommandFailure::ElevationUnavailable { tool: "pkexec".to_string() })
        );
    }

    #[test]
    fn test_empty_argv() {
        let result = local_runner().run(&[], false, Duration::from_secs(1));
        assert_eq!(result.failure, Some(CommandFailure::Empty));
    }

    #[test]
    fn test_spawn_failure_is_result() {
        let result = local_runner().run(
            &argv(&["lian-definitely-not-a-command"]),
            false,
            Duration::from_secs(5),
        );
        assert!(!result.success);
        assert!(matches!(result.failure, Some(CommandFailure::Spawn(_))));
        assert_eq!(result.exit_code, -1);
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_output() {
        let result = local_runner().run(
            &argv(&["sh", "-c", "echo hello; echo oops >&2"]),
            false,
            Duration::from_secs(10),
        );
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit() {
        let result = local_runner().run(&argv(&["sh", "-c", "exit 3"]), false, Duration::from_secs(10));
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.failure, Some(CommandFailure::Exit { code: 3 }));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_returns_promptly() {
        let start = Instant::now();
        let result = local_runner().run(&argv(&["sleep", "30"]), false, Duration::from_millis(500));
        assert!(!result.success);
        assert!(matches!(result.failure, Some(CommandFailure::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_millis(2500));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_when_background_child_holds_pipe() {
        // 直接子进程立即退出，后台 sleep 继续持有 stdout
        let start = Instant::now();
        let result = local_runner().run(
            &argv(&["sh", "-c", "sleep 30 & echo started"]),
            false,
            Duration::from_millis(500),
        );
        assert!(!result.success);
        assert!(matches!(result.failure, Some(CommandFailure::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_millis(2500));
    }

    #[cfg(unix)]
    #[test]
    fn test_short_background_child_finishes_normally() {
        let result = local_runner().run(
            &argv(&["sh", "-c", "sleep 0.2 & echo started"]),
            false,
            Duration::from_secs(10),
        );
        assert!(result.success);
        assert_eq!(result.stdout, "started\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_grandchildren() {
        // 后台 sleep 持有输出管道，只杀直接子进程会一直阻塞
        let start = Instant::now();
        let result = local_runner().run(
            &argv(&["sh", "-c", "sleep 30 & sleep 30; wait"]),
            false,
            Duration::from_millis(500),
        );
        assert!(matches!(result.failure, Some(CommandFailure::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_millis(2500));
    }
}
