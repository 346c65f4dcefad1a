//! 定时更新配置（JSON 文件，每次访问都整体读写）

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("读写定时配置失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("定时配置格式错误: {0}")]
    Json(#[from] serde_json::Error),
    #[error("无效的时间 \"{0}\"，应为 HH:MM")]
    InvalidTime(String),
    #[error("无效的星期 \"{0}\"")]
    InvalidDay(String),
    #[error("无法计算下次运行日期")]
    InvalidDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub schedule_type: ScheduleType,
    pub day_of_week: String,
    pub time: String,
    pub last_run: Option<String>,
    pub next_run: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule_type: ScheduleType::Weekly,
            day_of_week: "monday".to_string(),
            time: "14:00".to_string(),
            last_run: None,
            next_run: None,
        }
    }
}

impl ScheduleConfig {
    fn parsed_time(&self) -> Result<NaiveTime, ScheduleError> {
        parse_time(&self.time)
    }

    fn parsed_next_run(&self) -> Option<NaiveDateTime> {
        self.next_run.as_deref().and_then(|s| s.parse::<NaiveDateTime>().ok())
    }

    /// 从 `now` 起的下一次运行时间
    pub fn calculate_next_run(&self, now: NaiveDateTime) -> Result<NaiveDateTime, ScheduleError> {
        let time = self.parsed_time()?;
        let today = now.date();

        let next = match self.schedule_type {
            ScheduleType::Daily => {
                let candidate = today.and_time(time);
                if candidate <= now {
                    candidate + Duration::days(1)
                } else {
                    candidate
                }
            }
            ScheduleType::Weekly => {
                let target = parse_day(&self.day_of_week)?;
                let days_ahead = (target.num_days_from_monday() + 7
                    - today.weekday().num_days_from_monday())
                    % 7;
                let candidate = (today + Duration::days(days_ahead as i64)).and_time(time);
                if candidate <= now {
                    candidate + Duration::days(7)
                } else {
                    candidate
                }
            }
            ScheduleType::Monthly => {
                let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
                    .ok_or(ScheduleError::InvalidDate)?
                    .and_time(time);
                if first > now {
                    first
                } else {
                    let (year, month) = if today.month() == 12 {
                        (today.year() + 1, 1)
                    } else {
                        (today.year(), today.month() + 1)
                    };
                    NaiveDate::from_ymd_opt(year, month, 1)
                        .ok_or(ScheduleError::InvalidDate)?
                        .and_time(time)
                }
            }
        };
        Ok(next)
    }

    /// 已启用且到达下次运行时间
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.enabled && self.parsed_next_run().map(|next| next <= now).unwrap_or(false)
    }

    /// 面向用户的下次运行描述
    pub fn next_run_info(&self, now: NaiveDateTime) -> String {
        if !self.enabled {
            return "定时更新已关闭".to_string();
        }
        let Some(raw) = self.next_run.as_deref() else {
            return "尚未设置定时".to_string();
        };
        let Some(next) = self.parsed_next_run() else {
            return format!("无法解析下次运行时间: {}", raw);
        };
        if next <= now {
            return "即将运行".to_string();
        }

        let delta = next - now;
        let days = delta.num_days();
        let hours = delta.num_hours() % 24;
        let minutes = delta.num_minutes() % 60;
        if days > 0 {
            format!("{}天{}小时后", days, hours)
        } else if hours > 0 {
            format!("{}小时{}分钟后", hours, minutes)
        } else {
            format!("{}分钟后", minutes)
        }
    }
}

/// 定时配置文件的读写
pub struct ScheduleManager {
    path: PathBuf,
}

impl ScheduleManager {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取配置；文件不存在或损坏时返回默认值
    pub fn load(&self) -> ScheduleConfig {
        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::error!("定时配置解析失败 ({}): {}", self.path.display(), e);
                    ScheduleConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ScheduleConfig::default(),
            Err(e) => {
                log::error!("定时配置读取失败 ({}): {}", self.path.display(), e);
                ScheduleConfig::default()
            }
        }
    }

    pub fn save(&self, config: &ScheduleConfig) -> Result<(), ScheduleError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    /// 启用定时并计算下次运行时间
    pub fn set_schedule(
        &self,
        schedule_type: ScheduleType,
        day_of_week: &str,
        time: &str,
        now: NaiveDateTime,
    ) -> Result<ScheduleConfig, ScheduleError> {
        parse_time(time)?;
        if schedule_type == ScheduleType::Weekly {
            parse_day(day_of_week)?;
        }

        let mut config = self.load();
        config.enabled = true;
        config.schedule_type = schedule_type;
        config.day_of_week = day_of_week.to_lowercase();
        config.time = time.to_string();
        config.next_run = Some(format_timestamp(config.calculate_next_run(now)?));
        self.save(&config)?;
        log::info!(
            "定时更新已设置: {} {} {}",
            config.schedule_type,
            config.day_of_week,
            config.time
        );
        Ok(config)
    }

    pub fn disable(&self) -> Result<ScheduleConfig, ScheduleError> {
        let mut config = self.load();
        config.enabled = false;
        self.save(&config)?;
        log::info!("定时更新已关闭");
        Ok(config)
    }

    /// 记录一次定时运行并推进下次运行时间
    pub fn mark_ran(&self, now: NaiveDateTime) -> Result<ScheduleConfig, ScheduleError> {
        let mut config = self.load();
        config.last_run = Some(format_timestamp(now));
        config.next_run = Some(format_timestamp(config.calculate_next_run(now)?));
        self.save(&config)?;
        Ok(config)
    }
}

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_time(time: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|_| ScheduleError::InvalidTime(time.to_string()))
}

fn parse_day(day: &str) -> Result<Weekday, ScheduleError> {
    day.trim()
        .parse::<Weekday>()
        .map_err(|_| ScheduleError::InvalidDay(day.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn config(schedule_type: ScheduleType, day: &str, time: &str) -> ScheduleConfig {
        ScheduleConfig {
            enabled: true,
            schedule_type,
            day_of_week: day.to_string(),
            time: time.to_string(),
            ..ScheduleConfig::default()
        }
    }

    // 2026-10-14 是星期三
    const WED: (i32, u32, u32) = (2026, 10, 14);

    #[test]
    fn test_daily_next_run() {
        let now = at(WED.0, WED.1, WED.2, 10, 0);
        let c = config(ScheduleType::Daily, "monday", "14:00");
        assert_eq!(c.calculate_next_run(now).unwrap(), at(2026, 10, 14, 14, 0));
        let c = config(ScheduleType::Daily, "monday", "09:00");
        assert_eq!(c.calculate_next_run(now).unwrap(), at(2026, 10, 15, 9, 0));
        let c = config(ScheduleType::Daily, "monday", "10:00");
        assert_eq!(c.calculate_next_run(now).unwrap(), at(2026, 10, 15, 10, 0));
    }

    #[test]
    fn test_weekly_next_run() {
        let now = at(WED.0, WED.1, WED.2, 10, 0);
        let c = config(ScheduleType::Weekly, "monday", "14:00");
        assert_eq!(c.calculate_next_run(now).unwrap(), at(2026, 10, 19, 14, 0));
        let c = config(ScheduleType::Weekly, "Wednesday", "11:00");
        assert_eq!(c.calculate_next_run(now).unwrap(), at(2026, 10, 14, 11, 0));
        let c = config(ScheduleType::Weekly, "wednesday", "09:00");
        assert_eq!(c.calculate_next_run(now).unwrap(), at(2026, 10, 21, 9, 0));
    }

    #[test]
    fn test_monthly_next_run() {
        let c = config(ScheduleType::Monthly, "monday", "14:00");
        assert_eq!(
            c.calculate_next_run(at(2026, 10, 1, 8, 0)).unwrap(),
            at(2026, 10, 1, 14, 0)
        );
        assert_eq!(
            c.calculate_next_run(at(2026, 10, 14, 8, 0)).unwrap(),
            at(2026, 11, 1, 14, 0)
        );
        assert_eq!(
            c.calculate_next_run(at(2026, 12, 5, 8, 0)).unwrap(),
            at(2027, 1, 1, 14, 0)
        );
    }

    #[test]
    fn test_invalid_inputs() {
        let now = at(WED.0, WED.1, WED.2, 10, 0);
        assert!(matches!(
            config(ScheduleType::Daily, "monday", "25:00").calculate_next_run(now),
            Err(ScheduleError::InvalidTime(_))
        ));
        assert!(matches!(
            config(ScheduleType::Weekly, "funday", "10:00").calculate_next_run(now),
            Err(ScheduleError::InvalidDay(_))
        ));
    }

    #[test]
    fn test_next_run_info() {
        let now = at(WED.0, WED.1, WED.2, 10, 0);
        let mut c = config(ScheduleType::Daily, "monday", "14:00");

        c.next_run = Some(format_timestamp(at(2026, 10, 15, 12, 30)));
        assert_eq!(c.next_run_info(now), "1天2小时后");
        c.next_run = Some(format_timestamp(at(2026, 10, 14, 12, 5)));
        assert_eq!(c.next_run_info(now), "2小时5分钟后");
        c.next_run = Some(format_timestamp(at(2026, 10, 14, 10, 30)));
        assert_eq!(c.next_run_info(now), "30分钟后");
        c.next_run = Some(format_timestamp(at(2026, 10, 14, 9, 0)));
        assert_eq!(c.next_run_info(now), "即将运行");
        c.next_run = None;
        assert_eq!(c.next_run_info(now), "尚未设置定时");
        c.enabled = false;
        assert_eq!(c.next_run_info(now), "定时更新已关闭");
    }

    #[test]
    fn test_is_due() {
        let now = at(WED.0, WED.1, WED.2, 10, 0);
        let mut c = config(ScheduleType::Daily, "monday", "09:00");
        c.next_run = Some("2026-10-14T09:00:00".to_string());
        assert!(c.is_due(now));
        // 兼容带小数秒的时间戳
        c.next_run = Some("2026-10-14T10:00:00.123456".to_string());
        assert!(!c.is_due(now));
        c.next_run = Some("2026-10-14T09:00:00".to_string());
        c.enabled = false;
        assert!(!c.is_due(now));
    }

    #[test]
    fn test_load_missing_or_corrupt_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScheduleManager::new(dir.path().join("schedule_config.json"));
        assert_eq!(manager.load(), ScheduleConfig::default());

        fs::write(manager.path(), "{ not json").unwrap();
        assert_eq!(manager.load(), ScheduleConfig::default());
    }

    #[test]
    fn test_set_schedule_persists_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScheduleManager::new(dir.path().join("nested/schedule_config.json"));
        let now = at(WED.0, WED.1, WED.2, 10, 0);

        let saved = manager
            .set_schedule(ScheduleType::Weekly, "Friday", "06:30", now)
            .unwrap();
        assert!(saved.enabled);
        assert_eq!(saved.next_run.as_deref(), Some("2026-10-16T06:30:00"));
        assert_eq!(manager.load(), saved);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(manager.path()).unwrap()).unwrap();
        assert_eq!(raw["enabled"], true);
        assert_eq!(raw["schedule_type"], "weekly");
        assert_eq!(raw["day_of_week"], "friday");
        assert_eq!(raw["time"], "06:30");
        assert!(raw["last_run"].is_null());
        assert_eq!(raw["next_run"], "2026-10-16T06:30:00");
    }

    #[test]
    fn test_set_schedule_rejects_bad_time() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScheduleManager::new(dir.path().join("schedule_config.json"));
        let now = at(WED.0, WED.1, WED.2, 10, 0);
        assert!(manager.set_schedule(ScheduleType::Daily, "", "7pm", now).is_err());
        assert!(!manager.path().exists());
    }

    #[test]
    fn test_mark_ran_advances_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScheduleManager::new(dir.path().join("schedule_config.json"));
        let set_at = at(WED.0, WED.1, WED.2, 10, 0);
        manager.set_schedule(ScheduleType::Daily, "", "14:00", set_at).unwrap();

        let fired = at(2026, 10, 14, 14, 0);
        let after = manager.mark_ran(fired).unwrap();
        assert_eq!(after.last_run.as_deref(), Some("2026-10-14T14:00:00"));
        assert_eq!(after.next_run.as_deref(), Some("2026-10-15T14:00:00"));
        assert!(!after.is_due(fired));
    }

    #[test]
    fn test_disable_keeps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScheduleManager::new(dir.path().join("schedule_config.json"));
        let now = at(WED.0, WED.1, WED.2, 10, 0);
        manager.set_schedule(ScheduleType::Monthly, "", "03:00", now).unwrap();

        let disabled = manager.disable().unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.schedule_type, ScheduleType::Monthly);
        assert_eq!(manager.load().time, "03:00");
    }
}
