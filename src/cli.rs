//! 命令行定义与各子命令的实现

use crate::config::Config;
use crate::history::HistoryStore;
use crate::hooks::HookRegistry;
use crate::orchestrator::{Orchestrator, RunEvent, RunOutcome, NO_MANAGER_MESSAGE};
use crate::package_manager::parser::truncate_chars;
use crate::package_manager::{
    available_managers, Catalog, ManagerDescriptor, PathResolver, SystemPath, SystemRunner,
};
use crate::schedule::{local_now, ScheduleManager, ScheduleType};
use crate::sysinfo::PlatformInfo;
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "lian-updater")]
#[command(about = "跨平台系统包管理器一键更新", long_about = None)]
pub struct Cli {
    /// 输出调试日志
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// 配置文件路径（默认 ~/.config/lian-updater/config.toml）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 显示系统信息
    Info {
        #[arg(long)]
        json: bool,
    },
    /// 列出检测到的包管理器及其更新命令
    List {
        /// 只显示指定的包管理器（如 apt、brew）
        id: Option<String>,
    },
    /// 依次运行所有更新命令
    Update {
        /// 不写入历史记录
        #[arg(long)]
        no_history: bool,
        #[arg(long = "type", value_enum, default_value_t = UpdateType::Manual)]
        update_type: UpdateType,
    },
    /// 查看更新历史
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// 管理定时更新
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    Show { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum ScheduleAction {
    Show,
    Set {
        #[arg(value_enum)]
        schedule_type: ScheduleType,
        /// 星期几（仅 weekly 使用）
        #[arg(long, default_value = "monday")]
        day: String,
        /// 运行时间 HH:MM
        #[arg(long)]
        time: String,
    },
    Disable,
    /// 前台运行定时守护进程
    Daemon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UpdateType {
    Manual,
    Scheduled,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Manual => "manual",
            UpdateType::Scheduled => "scheduled",
        }
    }
}

/// 执行子命令，返回是否全部成功
pub async fn run(command: Commands, config: Config) -> Result<bool> {
    match command {
        Commands::Info { json } => {
            let platform = PlatformInfo::detect();
            if json {
                println!("{}", platform.to_json());
            } else {
                println!("系统: {}", platform.os_family);
                println!("发行版: {}", platform.distribution_label);
                println!("架构: {}", platform.architecture);
                println!("内核: {}", platform.kernel_release);
            }
            Ok(true)
        }
        Commands::List { id } => {
            let platform = PlatformInfo::detect();
            let catalog = available_managers(&platform, &SystemPath::new());
            match id {
                Some(id) => {
                    let Some(manager) = catalog.get(&id) else {
                        anyhow::bail!("{} 上未检测到包管理器 {}", platform.os_family, id);
                    };
                    print_manager(manager);
                }
                None => print_catalog(&catalog),
            }
            Ok(true)
        }
        Commands::Update {
            no_history,
            update_type,
        } => update(config, !no_history, update_type).await,
        Commands::History { action } => history(&config, action).map(|_| true),
        Commands::Schedule { action } => schedule(&config, action).await.map(|_| true),
    }
}

fn print_catalog(catalog: &Catalog) {
    if catalog.is_empty() {
        println!("{}", NO_MANAGER_MESSAGE);
        return;
    }
    println!("检测到 {} 个包管理器，共 {} 条命令:", catalog.len(), catalog.total_commands());
    for manager in catalog.iter() {
        print_manager(manager);
    }
}

fn print_manager(manager: &ManagerDescriptor) {
    println!("📦 {} ({})", manager.display_name, manager.id);
    for argv in &manager.commands {
        println!("    $ {}", argv.join(" "));
    }
}

/// 一次更新所需的运行环境
struct UpdateContext {
    platform: PlatformInfo,
    resolver: Arc<dyn PathResolver>,
    orchestrator: Arc<Orchestrator>,
}

impl UpdateContext {
    fn new(config: &Config, record_history: bool) -> Self {
        let platform = PlatformInfo::detect();
        let resolver: Arc<dyn PathResolver> = Arc::new(SystemPath::new());
        let runner = Arc::new(SystemRunner::new(platform.os_family, Arc::clone(&resolver)));

        let history = if record_history && config.history_enabled {
            match HistoryStore::open(&config.history_dir) {
                Ok(store) => Some(store),
                Err(e) => {
                    log::warn!("历史记录不可用，本次不记录: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let hooks = HookRegistry::with_defaults(config);
        log::debug!("已注册钩子: {:?}", hooks.names());

        let orchestrator = Arc::new(Orchestrator::new(
            runner,
            history,
            hooks,
            platform.clone(),
            config.clone(),
        ));

        Self {
            platform,
            resolver,
            orchestrator,
        }
    }

    /// 每次运行前重新探测，安装或卸载的包管理器会在下一次运行生效
    fn catalog(&self) -> Catalog {
        available_managers(&self.platform, self.resolver.as_ref())
    }
}

async fn update(config: Config, record_history: bool, update_type: UpdateType) -> Result<bool> {
    let ctx = UpdateContext::new(&config, record_history);
    println!("🖥️  {}", ctx.platform.summary());
    let outcome = drive_run(&ctx.orchestrator, ctx.catalog(), update_type.as_str()).await?;
    Ok(outcome.all_succeeded())
}

/// 在工作线程中运行并在当前任务上渲染事件；Ctrl-C 请求在命令之间取消
async fn drive_run(orchestrator: &Arc<Orchestrator>, catalog: Catalog, update_type: &str) -> Result<RunOutcome> {
    let (tx, mut rx) = mpsc::channel(64);
    let worker = orchestrator.spawn_run(catalog, update_type, tx)?;

    let mut outcome = None;
    let mut cancel_requested = false;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(RunEvent::Progress(p)) => {
                    println!("[{:>3.0}%] ({}/{}) {}", p.percent, p.completed, p.total, p.label);
                }
                Some(RunEvent::CommandFinished { manager, command, success }) => {
                    log::debug!("{} `{}` 结束: {}", manager, command, if success { "成功" } else { "失败" });
                }
                Some(RunEvent::Done { summary, details }) => {
                    println!();
                    for detail in &details {
                        println!("{}", detail);
                    }
                    println!("{}", summary);
                }
                Some(RunEvent::Finished(result)) => outcome = Some(result),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                eprintln!("⏹ 收到中断，当前命令结束后停止...");
                orchestrator.cancel();
                cancel_requested = true;
            }
        }
    }

    if worker.join().is_err() {
        log::error!("更新线程异常退出");
    }
    outcome.ok_or_else(|| anyhow!("更新线程未返回结果"))
}

fn history(config: &Config, action: HistoryAction) -> Result<()> {
    let store = HistoryStore::open(&config.history_dir)?;
    log::debug!("历史数据库: {}", store.db_path().display());
    match action {
        HistoryAction::List { limit } => {
            let sessions = store.recent_sessions(limit)?;
            if sessions.is_empty() {
                println!("暂无更新记录");
            }
            for s in sessions {
                println!(
                    "#{:<4} {}  {:<9} {}/{}  {:>7.1}s  {}",
                    s.id,
                    s.timestamp,
                    s.update_type,
                    s.success_count,
                    s.total_commands,
                    s.duration_seconds,
                    s.status.as_str()
                );
            }
        }
        HistoryAction::Show { id } => {
            let Some(details) = store.session_details(id)? else {
                anyhow::bail!("未找到会话 #{}", id);
            };
            let s = &details.session;
            println!("会话 #{} ({})", s.id, s.update_type);
            println!("时间: {}", s.timestamp);
            println!("状态: {}", s.status.as_str());
            println!(
                "结果: {}/{} 成功, 耗时 {:.1}s",
                s.success_count, s.total_commands, s.duration_seconds
            );
            println!("系统: {}", s.system_info);
            println!();
            for c in &details.commands {
                let code = c.return_code.map(|rc| rc.to_string()).unwrap_or_else(|| "-".to_string());
                println!(
                    "{} [{}] {}: {} (退出码 {}, {:.1}s)",
                    c.timestamp, c.status, c.command_name, c.command_text, code, c.duration_seconds
                );
                if !c.error.is_empty() {
                    println!("    {}", truncate_chars(c.error.lines().next().unwrap_or(""), 200));
                }
            }
        }
    }
    Ok(())
}

async fn schedule(config: &Config, action: ScheduleAction) -> Result<()> {
    let manager = ScheduleManager::new(config.schedule_file.clone());
    let now = local_now();
    match action {
        ScheduleAction::Show => {
            let s = manager.load();
            println!("状态: {}", if s.enabled { "已启用" } else { "已关闭" });
            println!("类型: {}", s.schedule_type);
            if s.schedule_type == ScheduleType::Weekly {
                println!("星期: {}", s.day_of_week);
            }
            println!("时间: {}", s.time);
            println!("上次运行: {}", s.last_run.as_deref().unwrap_or("-"));
            println!("下次运行: {}", s.next_run_info(now));
        }
        ScheduleAction::Set {
            schedule_type,
            day,
            time,
        } => {
            let s = manager.set_schedule(schedule_type, &day, &time, now)?;
            println!("✅ 定时更新已设置，下次运行: {}", s.next_run_info(now));
        }
        ScheduleAction::Disable => {
            manager.disable()?;
            println!("定时更新已关闭");
        }
        ScheduleAction::Daemon => daemon(config.clone()).await?,
    }
    Ok(())
}

/// 轮询定时配置，到期时触发一次 `scheduled` 更新
async fn daemon(config: Config) -> Result<()> {
    let manager = ScheduleManager::new(config.schedule_file.clone());
    let ctx = UpdateContext::new(&config, true);
    log::info!(
        "定时守护进程已启动（每 {}s 检查一次），下次运行: {}",
        config.scheduler_poll().as_secs(),
        manager.load().next_run_info(local_now())
    );
    log::debug!("定时配置: {}", manager.path().display());

    let mut ticker = tokio::time::interval(config.scheduler_poll());
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("定时守护进程退出");
                break;
            }
        }

        let now = local_now();
        if !manager.load().is_due(now) {
            continue;
        }
        if ctx.orchestrator.is_running() {
            log::warn!("上一次更新仍在运行，跳过本次触发");
            continue;
        }
        if let Err(e) = manager.mark_ran(now) {
            log::error!("更新定时配置失败: {}", e);
            continue;
        }

        log::info!("⏰ 定时更新触发");
        match drive_run(&ctx.orchestrator, ctx.catalog(), UpdateType::Scheduled.as_str()).await {
            Ok(outcome) if outcome.cancelled => {
                log::info!("定时更新被中断，守护进程退出");
                break;
            }
            Ok(outcome) => log::info!("{}", outcome.summary),
            Err(e) => log::error!("定时更新失败: {}", e),
        }
        log::info!("下次运行: {}", manager.load().next_run_info(local_now()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update_args() {
        let cli = Cli::try_parse_from(["lian-updater", "-v", "update", "--no-history", "--type", "scheduled"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Update {
                no_history,
                update_type,
            } => {
                assert!(no_history);
                assert_eq!(update_type.as_str(), "scheduled");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_update_defaults_to_manual() {
        let cli = Cli::try_parse_from(["lian-updater", "update"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Update {
                no_history: false,
                update_type: UpdateType::Manual
            }
        ));
    }

    #[test]
    fn test_parse_schedule_set() {
        let cli = Cli::try_parse_from([
            "lian-updater",
            "schedule",
            "set",
            "weekly",
            "--day",
            "friday",
            "--time",
            "06:30",
        ])
        .unwrap();
        match cli.command {
            Commands::Schedule {
                action: ScheduleAction::Set { schedule_type, day, time },
            } => {
                assert_eq!(schedule_type, ScheduleType::Weekly);
                assert_eq!(day, "friday");
                assert_eq!(time, "06:30");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_schedule_set_requires_time() {
        assert!(Cli::try_parse_from(["lian-updater", "schedule", "set", "daily"]).is_err());
        assert!(Cli::try_parse_from(["lian-updater", "schedule", "set", "hourly", "--time", "01:00"]).is_err());
    }

    #[test]
    fn test_history_list_limit() {
        let cli = Cli::try_parse_from(["lian-updater", "-c", "/tmp/x.toml", "history", "list", "--limit", "3"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/x.toml")));
        assert!(matches!(
            cli.command,
            Commands::History {
                action: HistoryAction::List { limit: 3 }
            }
        ));
    }

    #[tokio::test]
    async fn test_schedule_commands_use_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            schedule_file: dir.path().join("schedule_config.json"),
            ..Config::default()
        };
        schedule(
            &config,
            ScheduleAction::Set {
                schedule_type: ScheduleType::Daily,
                day: "monday".to_string(),
                time: "03:15".to_string(),
            },
        )
        .await
        .unwrap();
        let saved = ScheduleManager::new(config.schedule_file.clone()).load();
        assert!(saved.enabled);
        assert_eq!(saved.time, "03:15");

        schedule(&config, ScheduleAction::Disable).await.unwrap();
        assert!(!ScheduleManager::new(config.schedule_file.clone()).load().enabled);
        assert!(schedule(
            &config,
            ScheduleAction::Set {
                schedule_type: ScheduleType::Daily,
                day: "monday".to_string(),
                time: "3pm".to_string(),
            },
        )
        .await
        .is_err());
    }

    #[test]
    fn test_history_show_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            history_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(history(&config, HistoryAction::Show { id: 42 }).is_err());
        history(&config, HistoryAction::List { limit: 5 }).unwrap();
    }
}
