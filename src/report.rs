//! 运行报告：每次完成的运行写一份按日期归档的 Markdown 文本

use crate::orchestrator::RunOutcome;
use crate::sysinfo::PlatformInfo;
use anyhow::Result;
use chrono::{DateTime, Local};
use std::fs;
use std::path::PathBuf;

pub struct ReportSaver {
    base_dir: PathBuf,
}

impl ReportSaver {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// 写入 `<base_dir>/YYYY/MM/DD/HH-MM-SS.md`
    pub fn save(&self, outcome: &RunOutcome, platform: &PlatformInfo) -> Result<PathBuf> {
        let now = Local::now();

        let dir = self
            .base_dir
            .join(now.format("%Y").to_string())
            .join(now.format("%m").to_string())
            .join(now.format("%d").to_string());
        fs::create_dir_all(&dir)?;

        let filepath = dir.join(now.format("%H-%M-%S.md").to_string());
        fs::write(&filepath, render(outcome, platform, now))?;
        Ok(filepath)
    }
}

fn render(outcome: &RunOutcome, platform: &PlatformInfo, now: DateTime<Local>) -> String {
    let mut content = format!(
        "# {} 更新报告\n\n生成时间: {}\n系统: {}\n类型: {}\n",
        platform.distribution_label,
        now.format("%Y-%m-%d %H:%M:%S"),
        platform.summary(),
        outcome.update_type
    );
    if let Some(id) = outcome.session_id {
        content.push_str(&format!("会话: #{}\n", id));
    }
    content.push_str(&format!(
        "结果: {}/{} 成功 ({:.1}%), 耗时 {:.1}s\n",
        outcome.success_count,
        outcome.total_commands,
        outcome.success_rate(),
        outcome.duration.as_secs_f64()
    ));

    content.push_str(&format!("\n{}\n\n## 详情\n\n", outcome.summary));
    for detail in &outcome.details {
        content.push_str(&format!("- {}\n", detail));
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::RunState;
    use crate::sysinfo::OsFamily;
    use std::time::Duration;

    fn platform() -> PlatformInfo {
        PlatformInfo {
            os_family: OsFamily::Linux,
            distribution_label: "Arch Linux".to_string(),
            architecture: "x86_64".to_string(),
            kernel_release: "6.12.4-arch1-1".to_string(),
        }
    }

    fn outcome(session_id: Option<i64>) -> RunOutcome {
        RunOutcome {
            state: RunState::Completed,
            update_type: "scheduled".to_string(),
            summary: "🎉 更新完成! 1/2 成功 (3.0s)".to_string(),
            details: vec![
                "✅ Pacman Package Manager - 成功 (2.5s)".to_string(),
                "❌ Flatpak Applications - 失败: error: No remote refs found".to_string(),
            ],
            success_count: 1,
            failure_count: 1,
            total_commands: 2,
            duration: Duration::from_secs(3),
            session_id,
            cancelled: false,
        }
    }

    #[test]
    fn test_save_creates_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let saver = ReportSaver::new(dir.path().join("reports"));
        let path = saver.save(&outcome(Some(12)), &platform()).unwrap();

        assert!(path.starts_with(dir.path().join("reports")));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("md"));
        // YYYY/MM/DD/HH-MM-SS.md
        let rel = path.strip_prefix(dir.path().join("reports")).unwrap();
        assert_eq!(rel.components().count(), 4);
        assert_eq!(path.file_stem().unwrap().to_str().unwrap().len(), "HH-MM-SS".len());
    }

    #[test]
    fn test_render_includes_run_metadata() {
        let content = render(&outcome(Some(12)), &platform(), Local::now());
        assert!(content.starts_with("# Arch Linux 更新报告\n"));
        assert!(content.contains("类型: scheduled\n"));
        assert!(content.contains("会话: #12\n"));
        assert!(content.contains("结果: 1/2 成功 (50.0%), 耗时 3.0s\n"));
        assert!(content.contains("- ❌ Flatpak Applications - 失败: error: No remote refs found\n"));
    }

    #[test]
    fn test_render_without_history_session() {
        let content = render(&outcome(None), &platform(), Local::now());
        assert!(!content.contains("会话"));
        assert!(content.ends_with('\n'));
    }
}
