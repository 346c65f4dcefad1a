//! 更新历史：update_sessions / command_history 两张表。
//!
//! 每个操作都单独打开、写入、关闭连接；每条语句各自是一个原子单元，不跨命令开启事务。

use crate::package_manager::parser::output_excerpt;
use crate::package_manager::CommandResult;
use crate::sysinfo::PlatformInfo;
use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 历史记录中 stdout / stderr 摘录的最大字符数
pub const EXCERPT_CHARS: usize = 2000;

const DB_FILE: &str = "update_history.db";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("数据库错误: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("无法创建历史目录: {0}")]
    Io(#[from] std::io::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            _ => SessionStatus::Running,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// update_sessions 中的一行
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: i64,
    pub timestamp: String,
    pub update_type: String,
    pub success_count: i64,
    pub total_commands: i64,
    pub duration_seconds: f64,
    pub system_info: serde_json::Value,
    pub status: SessionStatus,
}

/// 待写入 command_history 的一条命令结果
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub command_name: String,
    pub command_text: String,
    pub status: String,
    pub return_code: i32,
    pub output: String,
    pub error: String,
    pub duration_seconds: f64,
}

impl CommandRecord {
    pub fn from_result(command_name: &str, argv: &[String], result: &CommandResult) -> Self {
        Self {
            command_name: command_name.to_string(),
            command_text: argv.join(" "),
            status: result.status_label().to_string(),
            return_code: result.exit_code,
            output: output_excerpt(&result.stdout, EXCERPT_CHARS),
            error: output_excerpt(&result.stderr, EXCERPT_CHARS),
            duration_seconds: result.duration.as_secs_f64(),
        }
    }
}

/// command_history 中的一行
#[derive(Debug, Clone)]
pub struct CommandHistoryRow {
    pub id: i64,
    pub session_id: i64,
    pub command_name: String,
    pub command_text: String,
    pub status: String,
    pub return_code: Option<i64>,
    pub output: String,
    pub error: String,
    pub duration_seconds: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct SessionDetails {
    pub session: SessionRecord,
    pub commands: Vec<CommandHistoryRow>,
}

pub struct HistoryStore {
    db_path: PathBuf,
}

impl HistoryStore {
    /// 打开（必要时创建）历史目录下的数据库
    pub fn open(history_dir: &Path) -> HistoryResult<Self> {
        fs::create_dir_all(history_dir)?;
        let store = Self {
            db_path: history_dir.join(DB_FILE),
        };
        store.setup_database()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> HistoryResult<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    fn setup_database(&self) -> HistoryResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS update_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                update_type TEXT NOT NULL,
                success_count INTEGER NOT NULL,
                total_commands INTEGER NOT NULL,
                duration_seconds REAL NOT NULL,
                system_info TEXT NOT NULL,
                status TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS command_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER,
                command_name TEXT NOT NULL,
                command_text TEXT NOT NULL,
                status TEXT NOT NULL,
                return_code INTEGER,
                output TEXT,
                error TEXT,
                duration_seconds REAL,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES update_sessions (id)
            );",
        )?;
        Ok(())
    }

    /// 插入一条 running 状态的会话，返回其 id
    pub fn start_session(&self, update_type: &str, platform: &PlatformInfo) -> HistoryResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO update_sessions
                (timestamp, update_type, success_count, total_commands, duration_seconds, system_info, status)
             VALUES (?1, ?2, 0, 0, 0, ?3, ?4)",
            params![
                now_iso(),
                update_type,
                platform.to_json(),
                SessionStatus::Running.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 追加一条命令结果
    pub fn log_command_result(&self, session_id: i64, record: &CommandRecord) -> HistoryResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO command_history
                (session_id, command_name, command_text, status, return_code, output, error, duration_seconds, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session_id,
                record.command_name,
                record.command_text,
                record.status,
                record.return_code,
                record.output,
                record.error,
                record.duration_seconds,
                now_iso()
            ],
        )?;
        Ok(())
    }

    /// 将会话更新为终止状态
    pub fn complete_session(
        &self,
        session_id: i64,
        success_count: usize,
        total_commands: usize,
        duration_seconds: f64,
        status: SessionStatus,
    ) -> HistoryResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE update_sessions
             SET success_count = ?1, total_commands = ?2, duration_seconds = ?3, status = ?4
             WHERE id = ?5",
            params![
                success_count as i64,
                total_commands as i64,
                duration_seconds,
                status.as_str(),
                session_id
            ],
        )?;
        Ok(())
    }

    /// 最近的会话，新的在前
    pub fn recent_sessions(&self, limit: usize) -> HistoryResult<Vec<SessionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, update_type, success_count, total_commands, duration_seconds, system_info, status
             FROM update_sessions ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], session_from_row)?;
        let sessions = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// 会话详情及其全部命令记录
    pub fn session_details(&self, session_id: i64) -> HistoryResult<Option<SessionDetails>> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                "SELECT id, timestamp, update_type, success_count, total_commands, duration_seconds, system_info, status
                 FROM update_sessions WHERE id = ?1",
                params![session_id],
                session_from_row,
            )
            .optional()?;
        let Some(session) = session else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT id, session_id, command_name, command_text, status, return_code, output, error, duration_seconds, timestamp
             FROM command_history WHERE session_id = ?1 ORDER BY timestamp, id",
        )?;
        let commands = stmt
            .query_map(params![session_id], |row| {
                Ok(CommandHistoryRow {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    command_name: row.get(2)?,
                    command_text: row.get(3)?,
                    status: row.get(4)?,
                    return_code: row.get(5)?,
                    output: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    error: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                    duration_seconds: row.get::<_, Option<f64>>(8)?.unwrap_or_default(),
                    timestamp: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(SessionDetails { session, commands }))
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let raw_info: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(SessionRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        update_type: row.get(2)?,
        success_count: row.get(3)?,
        total_commands: row.get(4)?,
        duration_seconds: row.get(5)?,
        system_info: serde_json::from_str(&raw_info).unwrap_or(serde_json::Value::String(raw_info)),
        status: SessionStatus::parse(&status),
    })
}

fn now_iso() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
