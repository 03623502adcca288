// ==========================================
// 批量导入导出引擎 - 任务存储 SQLite 实现
// ==========================================
// 表: import_export_task（构造时自动建表）
// 红线: Repository 不含业务逻辑，只负责数据访问
// ==========================================

use crate::db::{configure_sqlite_connection, open_in_memory_connection, open_sqlite_connection};
use crate::domain::task::{ArtifactRef, ImportExportTask, TaskPage};
use crate::domain::types::{FileFormat, TaskKind, TaskStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::task_repo::TaskStore;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const SELECT_COLUMNS: &str = r#"
    task_id, owner, task_name, task_kind, data_type, file_format,
    source_artifact, query_params, declared_total, remark,
    status, progress_percent, total_count, success_count, failure_count,
    result_artifact, error_report, error_message, download_count,
    created_at, started_at, finished_at
"#;

// ==========================================
// SqliteTaskStore - 任务存储
// ==========================================
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// 打开数据库文件并确保任务表存在
    pub fn open(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 内存库（测试 / 单进程临时使用）
    pub fn in_memory() -> RepositoryResult<Self> {
        let conn = open_in_memory_connection()?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 从已有连接创建（与 ConfigManager 共享连接时使用）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            configure_sqlite_connection(&guard)?;
        }
        let store = Self { conn };
        store.ensure_task_table()?;
        Ok(store)
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 确保 import_export_task 表存在
    fn ensure_task_table(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS import_export_task (
                task_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                task_name TEXT NOT NULL,
                task_kind TEXT NOT NULL,
                data_type TEXT NOT NULL,
                file_format TEXT NOT NULL,
                source_artifact TEXT,
                query_params TEXT NOT NULL DEFAULT 'null',
                declared_total INTEGER,
                remark TEXT,
                status TEXT NOT NULL,
                progress_percent INTEGER NOT NULL DEFAULT 0,
                total_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                result_artifact TEXT,
                error_report TEXT,
                error_message TEXT,
                download_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_import_export_task_owner
                ON import_export_task(owner, created_at);
            "#,
        )?;
        Ok(())
    }
}

impl TaskStore for SqliteTaskStore {
    fn create_task(&self, task: &ImportExportTask) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO import_export_task (
                task_id, owner, task_name, task_kind, data_type, file_format,
                source_artifact, query_params, declared_total, remark,
                status, progress_percent, total_count, success_count, failure_count,
                result_artifact, error_report, error_message, download_count,
                created_at, started_at, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22)
            "#,
            params![
                task.task_id,
                task.owner,
                task.task_name,
                task.task_kind.as_str(),
                task.data_type,
                task.file_format.as_str(),
                task.source_artifact.as_ref().map(|a| a.as_str()),
                serde_json::to_string(&task.query_params)?,
                task.declared_total.map(|v| v as i64),
                task.remark,
                task.status.as_str(),
                task.progress_percent,
                task.total_count as i64,
                task.success_count as i64,
                task.failure_count as i64,
                task.result_artifact.as_ref().map(|a| a.as_str()),
                task.error_report.as_ref().map(|a| a.as_str()),
                task.error_message,
                task.download_count,
                task.created_at,
                task.started_at,
                task.finished_at,
            ],
        )?;
        debug!(task_id = %task.task_id, "任务已写入");
        Ok(())
    }

    fn update_task(&self, task: &ImportExportTask) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE import_export_task SET
                task_name = ?2,
                remark = ?3,
                status = ?4,
                progress_percent = ?5,
                total_count = ?6,
                success_count = ?7,
                failure_count = ?8,
                result_artifact = ?9,
                error_report = ?10,
                error_message = ?11,
                download_count = ?12,
                started_at = ?13,
                finished_at = ?14
            WHERE task_id = ?1
            "#,
            params![
                task.task_id,
                task.task_name,
                task.remark,
                task.status.as_str(),
                task.progress_percent,
                task.total_count as i64,
                task.success_count as i64,
                task.failure_count as i64,
                task.result_artifact.as_ref().map(|a| a.as_str()),
                task.error_report.as_ref().map(|a| a.as_str()),
                task.error_message,
                task.download_count,
                task.started_at,
                task.finished_at,
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ImportExportTask".to_string(),
                id: task.task_id.clone(),
            });
        }
        Ok(())
    }

    fn get_task(&self, task_id: &str) -> RepositoryResult<Option<ImportExportTask>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM import_export_task WHERE task_id = ?1",
            SELECT_COLUMNS
        );
        let task = conn
            .query_row(&sql, params![task_id], map_task_row)
            .optional()?;
        Ok(task)
    }

    fn list_tasks_by_owner(
        &self,
        owner: &str,
        page_num: u32,
        page_size: u32,
    ) -> RepositoryResult<TaskPage> {
        let page_num = page_num.max(1);
        let page_size = page_size.max(1);
        let offset = i64::from(page_num - 1) * i64::from(page_size);

        let conn = self.get_conn()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM import_export_task WHERE owner = ?1",
            params![owner],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM import_export_task WHERE owner = ?1 \
             ORDER BY created_at DESC, task_id DESC LIMIT ?2 OFFSET ?3",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params![owner, i64::from(page_size), offset], map_task_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TaskPage {
            items: tasks.iter().map(ImportExportTask::snapshot).collect(),
            total: total as u64,
            page_num,
            page_size,
        })
    }
}

fn conversion_error(idx: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("无效取值: {}", raw).into())
}

fn map_task_row(row: &Row<'_>) -> rusqlite::Result<ImportExportTask> {
    let task_kind: String = row.get(3)?;
    let file_format: String = row.get(5)?;
    let query_params: String = row.get(7)?;
    let status: String = row.get(10)?;

    Ok(ImportExportTask {
        task_id: row.get(0)?,
        owner: row.get(1)?,
        task_name: row.get(2)?,
        task_kind: TaskKind::parse(&task_kind).ok_or_else(|| conversion_error(3, &task_kind))?,
        data_type: row.get(4)?,
        file_format: FileFormat::parse(&file_format)
            .ok_or_else(|| conversion_error(5, &file_format))?,
        source_artifact: row.get::<_, Option<String>>(6)?.map(ArtifactRef::new),
        query_params: serde_json::from_str(&query_params)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        declared_total: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
        remark: row.get(9)?,
        status: TaskStatus::parse(&status).ok_or_else(|| conversion_error(10, &status))?,
        progress_percent: row.get(11)?,
        total_count: row.get::<_, i64>(12)? as u64,
        success_count: row.get::<_, i64>(13)? as u64,
        failure_count: row.get::<_, i64>(14)? as u64,
        result_artifact: row.get::<_, Option<String>>(15)?.map(ArtifactRef::new),
        error_report: row.get::<_, Option<String>>(16)?.map(ArtifactRef::new),
        error_message: row.get(17)?,
        download_count: row.get(18)?,
        created_at: row.get(19)?,
        started_at: row.get(20)?,
        finished_at: row.get(21)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskRequest;
    use chrono::{Duration, Utc};

    fn sample_task(owner: &str) -> ImportExportTask {
        ImportExportTask::from_request(TaskRequest::import(
            "用户导入",
            owner,
            "user",
            FileFormat::Csv,
            ArtifactRef::new("abc/users.csv"),
        ))
    }

    #[test]
    fn test_create_and_get() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = sample_task("alice");
        store.create_task(&task).unwrap();

        let loaded = store.get_task(&task.task_id).unwrap().unwrap();
        assert_eq!(loaded.task_id, task.task_id);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.file_format, FileFormat::Csv);
        assert_eq!(loaded.source_artifact, task.source_artifact);

        assert!(store.get_task("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_counts_and_status() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let mut task = sample_task("alice");
        store.create_task(&task).unwrap();

        task.status = TaskStatus::Succeeded;
        task.progress_percent = 100;
        task.total_count = 3;
        task.success_count = 1;
        task.failure_count = 2;
        task.error_report = Some(ArtifactRef::new("r/report.csv"));
        task.finished_at = Some(Utc::now());
        store.update_task(&task).unwrap();

        let loaded = store.get_task(&task.task_id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Succeeded);
        assert_eq!(loaded.progress_percent, 100);
        assert_eq!(
            (loaded.total_count, loaded.success_count, loaded.failure_count),
            (3, 1, 2)
        );
        assert_eq!(loaded.error_report, task.error_report);
        assert!(loaded.finished_at.is_some());
    }

    #[test]
    fn test_update_missing_task_is_not_found() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = sample_task("alice");

        assert!(matches!(
            store.update_task(&task),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_by_owner_paginates_newest_first() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut task = sample_task("alice");
            task.created_at = base + Duration::seconds(i);
            store.create_task(&task).unwrap();
            ids.push(task.task_id);
        }
        store.create_task(&sample_task("bob")).unwrap();

        let page1 = store.list_tasks_by_owner("alice", 1, 2).unwrap();
        assert_eq!(page1.total, 5);
        assert_eq!(page1.items.len(), 2);
        assert_eq!(page1.items[0].task_id, ids[4]);
        assert_eq!(page1.items[1].task_id, ids[3]);

        let page3 = store.list_tasks_by_owner("alice", 3, 2).unwrap();
        assert_eq!(page3.items.len(), 1);
        assert_eq!(page3.items[0].task_id, ids[0]);
    }
}
