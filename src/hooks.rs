//! 运行前后的扩展钩子。所有实现在编译期注册，钩子通过 [`HookContext`] 拿到所需的上下文。

use crate::config::Config;
use crate::orchestrator::{RunOutcome, RunState};
use crate::report::ReportSaver;
use crate::sysinfo::PlatformInfo;
use anyhow::Result;

/// 传给每个钩子的应用上下文
pub struct HookContext<'a> {
    pub platform: &'a PlatformInfo,
    pub config: &'a Config,
    pub update_type: &'a str,
}

pub trait RunHook: Send + Sync {
    fn name(&self) -> &str;

    fn before_update(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn after_update(&self, _ctx: &HookContext<'_>, _outcome: &RunOutcome) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn RunHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置钩子：运行日志，以及（按配置）保存报告
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(LogHook));
        if config.save_reports {
            registry.register(Box::new(ReportHook::new(ReportSaver::new(config.report_dir.clone()))));
        }
        registry
    }

    pub fn register(&mut self, hook: Box<dyn RunHook>) {
        self.hooks.push(hook);
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// 依次调用；单个钩子出错只记录日志
    pub fn run_before(&self, ctx: &HookContext<'_>) {
        for hook in &self.hooks {
            if let Err(e) = hook.before_update(ctx) {
                log::warn!("钩子 {} before_update 失败: {}", hook.name(), e);
            }
        }
    }

    pub fn run_after(&self, ctx: &HookContext<'_>, outcome: &RunOutcome) {
        for hook in &self.hooks {
            if let Err(e) = hook.after_update(ctx, outcome) {
                log::warn!("钩子 {} after_update 失败: {}", hook.name(), e);
            }
        }
    }
}

/// 记录运行开始与结果
pub struct LogHook;

impl RunHook for LogHook {
    fn name(&self) -> &str {
        "log"
    }

    fn before_update(&self, ctx: &HookContext<'_>) -> Result<()> {
        log::info!("🔧 更新开始 - 类型: {}", ctx.update_type);
        log::info!("🖥️  系统: {}", ctx.platform.summary());
        Ok(())
    }

    fn after_update(&self, _ctx: &HookContext<'_>, outcome: &RunOutcome) -> Result<()> {
        log::info!(
            "📊 更新结果 - 成功: {}/{} ({:.1}%)",
            outcome.success_count,
            outcome.total_commands,
            outcome.success_rate()
        );
        for detail in &outcome.details {
            if detail.starts_with('✅') {
                log::info!("  {}", detail);
            } else {
                log::warn!("  {}", detail);
            }
        }
        Ok(())
    }
}

/// 运行完成后写入文本报告
pub struct ReportHook {
    saver: ReportSaver,
}

impl ReportHook {
    pub fn new(saver: ReportSaver) -> Self {
        Self { saver }
    }
}

impl RunHook for ReportHook {
    fn name(&self) -> &str {
        "report"
    }

    fn after_update(&self, ctx: &HookContext<'_>, outcome: &RunOutcome) -> Result<()> {
        if outcome.state != RunState::Completed {
            return Ok(());
        }
        let path = self.saver.save(outcome, ctx.platform)?;
        log::info!("报告已保存: {}", path.display());
        Ok(())
    }
}
