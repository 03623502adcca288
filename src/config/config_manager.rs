// ==========================================
// 批量导入导出引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::engine_config::{
    default_work_dir, EngineConfigReader, DEFAULT_BATCH_SIZE, DEFAULT_MAX_IMPORT_ROWS,
    DEFAULT_MAX_UPLOAD_SIZE_BYTES, DEFAULT_UPLOAD_SESSION_TTL_SECS, DEFAULT_WORKER_THREADS,
};
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        manager.ensure_config_table()?;
        Ok(manager)
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        let manager = Self { conn };
        manager.ensure_config_table()?;
        Ok(manager)
    }

    /// 确保 config_kv 表存在
    fn ensure_config_table(&self) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS config_kv (
                scope_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (scope_id, key)
            );
            "#,
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（INSERT OR REPLACE）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取数值型配置，缺失或格式错误时回退默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>>
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!(key = key, value = %raw, default = %default, "配置值格式错误，使用默认值");
                    Ok(default)
                }
            },
        }
    }

    /// 获取所有 global 配置的快照
    pub fn get_config_snapshot(&self) -> Result<HashMap<String, String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(config_map)
    }
}

impl EngineConfigReader for ConfigManager {
    fn get_max_upload_size_bytes(&self) -> Result<u64, Box<dyn Error>> {
        self.get_parsed_or_default(config_keys::MAX_UPLOAD_SIZE_BYTES, DEFAULT_MAX_UPLOAD_SIZE_BYTES)
    }

    fn get_max_import_rows(&self) -> Result<usize, Box<dyn Error>> {
        self.get_parsed_or_default(config_keys::MAX_IMPORT_ROWS, DEFAULT_MAX_IMPORT_ROWS)
    }

    fn get_batch_size(&self) -> Result<usize, Box<dyn Error>> {
        self.get_parsed_or_default(config_keys::BATCH_SIZE, DEFAULT_BATCH_SIZE)
    }

    fn get_worker_threads(&self) -> Result<usize, Box<dyn Error>> {
        self.get_parsed_or_default(config_keys::WORKER_THREADS, DEFAULT_WORKER_THREADS)
    }

    fn get_upload_session_ttl_secs(&self) -> Result<u64, Box<dyn Error>> {
        self.get_parsed_or_default(
            config_keys::UPLOAD_SESSION_TTL_SECS,
            DEFAULT_UPLOAD_SESSION_TTL_SECS,
        )
    }

    fn get_work_dir(&self) -> Result<PathBuf, Box<dyn Error>> {
        Ok(self
            .get_config_value(config_keys::WORK_DIR)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_work_dir))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 上传
    pub const MAX_UPLOAD_SIZE_BYTES: &str = "upload.max_size_bytes";
    pub const UPLOAD_SESSION_TTL_SECS: &str = "upload.session_ttl_secs";

    // 导入
    pub const MAX_IMPORT_ROWS: &str = "import.max_rows";
    pub const BATCH_SIZE: &str = "import.batch_size";

    // 任务执行
    pub const WORKER_THREADS: &str = "task.worker_threads";
    pub const WORK_DIR: &str = "task.work_dir";
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_manager() -> (NamedTempFile, ConfigManager) {
        let temp_file = NamedTempFile::new().unwrap();
        let manager = ConfigManager::new(temp_file.path().to_str().unwrap()).unwrap();
        (temp_file, manager)
    }

    #[test]
    fn test_defaults_when_empty() {
        let (_tmp, manager) = create_manager();

        let config = manager.load_engine_config().unwrap();

        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.max_import_rows, DEFAULT_MAX_IMPORT_ROWS);
        assert_eq!(config.max_upload_size_bytes, DEFAULT_MAX_UPLOAD_SIZE_BYTES);
    }

    #[test]
    fn test_overrides_from_config_kv() {
        let (_tmp, manager) = create_manager();
        manager
            .set_global_config_value(config_keys::BATCH_SIZE, "200")
            .unwrap();
        manager
            .set_global_config_value(config_keys::MAX_IMPORT_ROWS, "1000")
            .unwrap();
        manager
            .set_global_config_value(config_keys::WORK_DIR, "/var/lib/bte")
            .unwrap();

        let config = manager.load_engine_config().unwrap();

        assert_eq!(config.batch_size, 200);
        assert_eq!(config.max_import_rows, 1000);
        assert_eq!(config.work_dir, PathBuf::from("/var/lib/bte"));
    }

    #[test]
    fn test_malformed_value_falls_back() {
        let (_tmp, manager) = create_manager();
        manager
            .set_global_config_value(config_keys::BATCH_SIZE, "abc")
            .unwrap();

        assert_eq!(manager.get_batch_size().unwrap(), DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_zero_batch_size_rejected_on_load() {
        let (_tmp, manager) = create_manager();
        manager
            .set_global_config_value(config_keys::BATCH_SIZE, "0")
            .unwrap();

        assert!(manager.load_engine_config().is_err());
    }

    #[test]
    fn test_snapshot() {
        let (_tmp, manager) = create_manager();
        manager
            .set_global_config_value(config_keys::WORKER_THREADS, "2")
            .unwrap();

        let snapshot = manager.get_config_snapshot().unwrap();
        assert_eq!(snapshot.get(config_keys::WORKER_THREADS), Some(&"2".to_string()));
    }
}
