// ==========================================
// 批量导入导出引擎 - 引擎配置
// ==========================================
// 职责: 上传/导入上限、批大小、工作线程数等运行参数
// 红线: 所有上限均为外部可配置项，不在业务代码中硬编码
// ==========================================

use std::error::Error;
use std::path::PathBuf;

/// 默认上传大小上限（200 MiB）
pub const DEFAULT_MAX_UPLOAD_SIZE_BYTES: u64 = 200 * 1024 * 1024;
/// 默认导入行数上限
pub const DEFAULT_MAX_IMPORT_ROWS: usize = 100_000;
/// 默认批大小
pub const DEFAULT_BATCH_SIZE: usize = 500;
/// 默认工作线程数
pub const DEFAULT_WORKER_THREADS: usize = 4;
/// 默认上传会话保留时长（秒）
pub const DEFAULT_UPLOAD_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
/// 默认错误信息最大长度（字符）
pub const DEFAULT_ERROR_MESSAGE_MAX_LEN: usize = 500;
/// 默认工作表名
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

// ==========================================
// EngineConfig - 引擎运行配置
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_upload_size_bytes: u64,
    pub max_import_rows: usize,
    pub batch_size: usize,
    pub worker_threads: usize,
    pub upload_session_ttl_secs: u64,
    pub error_message_max_len: usize,
    pub default_sheet_name: String,
    /// 工作目录（uploads / artifacts / tmp 子目录）
    pub work_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_upload_size_bytes: DEFAULT_MAX_UPLOAD_SIZE_BYTES,
            max_import_rows: DEFAULT_MAX_IMPORT_ROWS,
            batch_size: DEFAULT_BATCH_SIZE,
            worker_threads: DEFAULT_WORKER_THREADS,
            upload_session_ttl_secs: DEFAULT_UPLOAD_SESSION_TTL_SECS,
            error_message_max_len: DEFAULT_ERROR_MESSAGE_MAX_LEN,
            default_sheet_name: DEFAULT_SHEET_NAME.to_string(),
            work_dir: default_work_dir(),
        }
    }
}

impl EngineConfig {
    /// 以指定工作目录构造默认配置（测试常用）
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.work_dir.join("uploads")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.work_dir.join("artifacts")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.work_dir.join("tmp")
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size 必须大于 0".to_string());
        }
        if self.worker_threads == 0 {
            return Err("worker_threads 必须大于 0".to_string());
        }
        if self.max_import_rows == 0 {
            return Err("max_import_rows 必须大于 0".to_string());
        }
        if self.max_upload_size_bytes == 0 {
            return Err("max_upload_size_bytes 必须大于 0".to_string());
        }
        Ok(())
    }
}

/// 默认工作目录：用户数据目录下的 bulk-transfer-engine，取不到则用当前目录
pub fn default_work_dir() -> PathBuf {
    match dirs::data_dir() {
        Some(data_dir) => data_dir.join("bulk-transfer-engine"),
        None => PathBuf::from("./bulk-transfer-data"),
    }
}

// ==========================================
// EngineConfigReader Trait
// ==========================================
// 用途: 引擎所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
pub trait EngineConfigReader: Send + Sync {
    /// 上传文件大小上限（字节）
    ///
    /// # 默认值
    /// - 200 MiB
    fn get_max_upload_size_bytes(&self) -> Result<u64, Box<dyn Error>>;

    /// 单次导入行数上限
    ///
    /// # 默认值
    /// - 100000
    fn get_max_import_rows(&self) -> Result<usize, Box<dyn Error>>;

    /// 批大小（每批校验/落库/进度检查点的行数）
    ///
    /// # 默认值
    /// - 500
    fn get_batch_size(&self) -> Result<usize, Box<dyn Error>>;

    /// 工作线程数（同时执行的任务数）
    fn get_worker_threads(&self) -> Result<usize, Box<dyn Error>>;

    /// 上传会话保留时长（秒）
    fn get_upload_session_ttl_secs(&self) -> Result<u64, Box<dyn Error>>;

    /// 工作目录
    fn get_work_dir(&self) -> Result<PathBuf, Box<dyn Error>>;

    /// 汇总为 EngineConfig
    fn load_engine_config(&self) -> Result<EngineConfig, Box<dyn Error>> {
        let config = EngineConfig {
            max_upload_size_bytes: self.get_max_upload_size_bytes()?,
            max_import_rows: self.get_max_import_rows()?,
            batch_size: self.get_batch_size()?,
            worker_threads: self.get_worker_threads()?,
            upload_session_ttl_secs: self.get_upload_session_ttl_secs()?,
            work_dir: self.get_work_dir()?,
            ..EngineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
