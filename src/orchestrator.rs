//! 更新流程编排：按目录顺序逐条执行命令，汇总结果并通过回调报告进度。
//!
//! 状态机 `Idle → Running → {Completed, Failed}`。只有开始时目录为空才进入 `Failed`；
//! 单条命令失败只记录，不中断后续命令。
//!
//! 后台运行时（[`Orchestrator::spawn_run`]）所有回调都以 [`RunEvent`] 的形式经 channel
//! 送回调用方线程，工作线程本身不接触任何展示逻辑。

use crate::config::Config;
use crate::history::{CommandRecord, HistoryStore, SessionStatus};
use crate::hooks::{HookContext, HookRegistry};
use crate::package_manager::{needs_elevation, Catalog, CommandFailure, CommandResult, CommandRunner, ManagerDescriptor};
use crate::sysinfo::PlatformInfo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

/// 目录为空时的提示
pub const NO_MANAGER_MESSAGE: &str = "❌ 未找到受支持的包管理器";

/// 失败详情中错误摘录的最大字符数
const DETAIL_ERROR_CHARS: usize = 150;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("已有更新正在运行")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// 执行每条命令之前发出的进度
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
    pub label: String,
}

impl Progress {
    fn new(completed: usize, total: usize, label: String) -> Self {
        Self {
            completed,
            total,
            percent: completed as f64 * 100.0 / total as f64,
            label,
        }
    }
}

/// 一次运行的最终结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    pub update_type: String,
    pub summary: String,
    pub details: Vec<String>,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_commands: usize,
    pub duration: Duration,
    pub session_id: Option<i64>,
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn success_rate(&self) -> f64 {
        if self.total_commands == 0 {
            0.0
        } else {
            self.success_count as f64 * 100.0 / self.total_commands as f64
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.state == RunState::Completed && self.success_count == self.total_commands
    }
}

/// 运行过程的观察者（进度回调与完成回调）
pub trait RunObserver {
    fn on_progress(&mut self, progress: &Progress);

    fn on_command_finished(&mut self, _manager: &ManagerDescriptor, _argv: &[String], _result: &CommandResult) {}

    fn on_done(&mut self, summary: &str, details: &[String]);
}

/// 后台运行时送回调用方线程的事件
#[derive(Debug, Clone)]
pub enum RunEvent {
    Progress(Progress),
    CommandFinished {
        manager: String,
        command: String,
        success: bool,
    },
    Done {
        summary: String,
        details: Vec<String>,
    },
    Finished(RunOutcome),
}

/// 把回调转换为 channel 消息
pub struct ChannelObserver {
    tx: mpsc::Sender<RunEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<RunEvent>) -> Self {
        Self { tx }
    }
}

impl RunObserver for ChannelObserver {
    fn on_progress(&mut self, progress: &Progress) {
        let _ = self.tx.blocking_send(RunEvent::Progress(progress.clone()));
    }

    fn on_command_finished(&mut self, manager: &ManagerDescriptor, argv: &[String], result: &CommandResult) {
        let _ = self.tx.blocking_send(RunEvent::CommandFinished {
            manager: manager.display_name.clone(),
            command: argv.join(" "),
            success: result.success,
        });
    }

    fn on_done(&mut self, summary: &str, details: &[String]) {
        let _ = self.tx.blocking_send(RunEvent::Done {
            summary: summary.to_string(),
            details: details.to_vec(),
        });
    }
}

/// 持有期间 running 标志保持为 true，释放时复位
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct Orchestrator {
    runner: Arc<dyn CommandRunner>,
    history: Option<HistoryStore>,
    hooks: HookRegistry,
    platform: PlatformInfo,
    config: Config,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    state: Mutex<RunState>,
}

impl Orchestrator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        history: Option<HistoryStore>,
        hooks: HookRegistry,
        platform: PlatformInfo,
        config: Config,
    ) -> Self {
        Self {
            runner,
            history,
            hooks,
            platform,
            config,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(RunState::Idle),
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 取消标志；在命令之间检查，不会打断正在执行的命令
    #[allow(dead_code)]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    fn should_cancel(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// 占用运行标志；已有运行时拒绝。
    /// 占用成功后清除上一次运行留下的取消请求，取消只作用于当前这次运行。
    pub fn try_begin(&self) -> Result<RunGuard, RunError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RunError::AlreadyRunning)?;
        self.reset_cancel();
        Ok(RunGuard {
            flag: Arc::clone(&self.running),
        })
    }

    /// 在当前线程同步执行一次完整运行
    #[allow(dead_code)]
    pub fn run_all(
        &self,
        catalog: &Catalog,
        update_type: &str,
        observer: &mut dyn RunObserver,
    ) -> Result<RunOutcome, RunError> {
        let _guard = self.try_begin()?;
        Ok(self.execute(catalog, update_type, observer))
    }

    /// 在独立工作线程中运行，事件经 `tx` 送回调用方。
    ///
    /// 运行标志（连同取消标志的复位）在创建线程之前完成，已有运行时不会产生第二个工作线程，
    /// 启动窗口期内设置的取消请求也不会被覆盖。
    pub fn spawn_run(
        self: &Arc<Self>,
        catalog: Catalog,
        update_type: &str,
        tx: mpsc::Sender<RunEvent>,
    ) -> Result<JoinHandle<()>, RunError> {
        let guard = self.try_begin()?;

        let this = Arc::clone(self);
        let update_type = update_type.to_string();
        Ok(std::thread::spawn(move || {
            let mut observer = ChannelObserver::new(tx.clone());
            let outcome = this.execute(&catalog, &update_type, &mut observer);
            drop(guard);
            let _ = tx.blocking_send(RunEvent::Finished(outcome));
        }))
    }

    fn execute(&self, catalog: &Catalog, update_type: &str, observer: &mut dyn RunObserver) -> RunOutcome {
        let start = Instant::now();
        self.set_state(RunState::Running);

        let ctx = HookContext {
            platform: &self.platform,
            config: &self.config,
            update_type,
        };
        self.hooks.run_before(&ctx);

        let session_id = self.history.as_ref().and_then(|h| {
            h.start_session(update_type, &self.platform)
                .map_err(|e| log::warn!("记录会话开始失败: {}", e))
                .ok()
        });

        if catalog.is_empty() {
            log::error!("{}", NO_MANAGER_MESSAGE);
            observer.on_done(NO_MANAGER_MESSAGE, &[]);
            self.complete_history(session_id, 0, 0, Duration::ZERO, SessionStatus::Failed);
            self.set_state(RunState::Failed);
            let outcome = RunOutcome {
                state: RunState::Failed,
                update_type: update_type.to_string(),
                summary: NO_MANAGER_MESSAGE.to_string(),
                details: Vec::new(),
                success_count: 0,
                failure_count: 0,
                total_commands: 0,
                duration: start.elapsed(),
                session_id,
                cancelled: false,
            };
            self.hooks.run_after(&ctx, &outcome);
            return outcome;
        }

        // 总数在开始时确定，运行中不再重新查询
        let total = catalog.total_commands();
        let timeout = self.config.command_timeout();
        let mut completed = 0;
        let mut success_count = 0;
        let mut cancelled = false;
        let mut details = Vec::with_capacity(total);

        for manager in catalog.iter() {
            for argv in &manager.commands {
                let result = if cancelled || self.should_cancel() {
                    cancelled = true;
                    CommandResult::failed(CommandFailure::Cancelled, Duration::ZERO)
                } else {
                    completed += 1;
                    observer.on_progress(&Progress::new(
                        completed,
                        total,
                        format!("{} - {}", manager.display_name, argv.join(" ")),
                    ));
                    self.runner.run(argv, needs_elevation(argv), timeout)
                };

                if result.success {
                    success_count += 1;
                }
                details.push(detail_line(&manager.display_name, &result));

                if let (Some(history), Some(id)) = (&self.history, session_id) {
                    let record = CommandRecord::from_result(&manager.display_name, argv, &result);
                    if let Err(e) = history.log_command_result(id, &record) {
                        log::warn!("记录命令结果失败: {}", e);
                    }
                }
                observer.on_command_finished(manager, argv, &result);
            }
        }

        let duration = start.elapsed();
        let summary = if cancelled {
            format!(
                "⏹ 更新已取消: {}/{} 成功 ({:.1}s)",
                success_count,
                total,
                duration.as_secs_f64()
            )
        } else {
            format!(
                "🎉 更新完成! {}/{} 成功 ({:.1}s)",
                success_count,
                total,
                duration.as_secs_f64()
            )
        };

        self.complete_history(session_id, success_count, total, duration, SessionStatus::Completed);
        self.set_state(RunState::Completed);
        observer.on_done(&summary, &details);

        let outcome = RunOutcome {
            state: RunState::Completed,
            update_type: update_type.to_string(),
            summary,
            details,
            success_count,
            failure_count: total - success_count,
            total_commands: total,
            duration,
            session_id,
            cancelled,
        };
        self.hooks.run_after(&ctx, &outcome);
        outcome
    }

    fn complete_history(
        &self,
        session_id: Option<i64>,
        success_count: usize,
        total: usize,
        duration: Duration,
        status: SessionStatus,
    ) {
        if let (Some(history), Some(id)) = (&self.history, session_id) {
            if let Err(e) = history.complete_session(id, success_count, total, duration.as_secs_f64(), status) {
                log::warn!("记录会话结束失败: {}", e);
            }
        }
    }
}

/// 单条命令的可读结果行
fn detail_line(manager_name: &str, result: &CommandResult) -> String {
    match &result.failure {
        None => format!(
            "✅ {} - 成功 ({:.1}s)",
            manager_name,
            result.duration.as_secs_f64()
        ),
        Some(CommandFailure::Timeout { after }) => {
            format!("⏰ {} - 超时 ({}s)", manager_name, after.as_secs())
        }
        Some(CommandFailure::Cancelled) => format!("⏹ {} - 已取消", manager_name),
        Some(CommandFailure::Spawn(_)) | Some(CommandFailure::ElevationUnavailable { .. }) => format!(
            "⚠️ {} - 执行错误: {}",
            manager_name,
            result.error_excerpt(DETAIL_ERROR_CHARS)
        ),
        Some(_) => format!(
            "❌ {} - 失败: {}",
            manager_name,
            result.error_excerpt(DETAIL_ERROR_CHARS)
        ),
    }
}
