// ==========================================
// 批量导入导出引擎 - 分片上传错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 分片上传错误类型
#[derive(Error, Debug)]
pub enum UploadError {
    // ===== 会话错误 =====
    #[error("上传会话不存在: {0}")]
    SessionNotFound(String),

    #[error("上传参数无效: {0}")]
    InvalidRequest(String),

    #[error("文件过大: 声明 {size} 字节，上限 {limit} 字节")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("分片号越界: {chunk_number}（共 {total_chunks} 片）")]
    ChunkOutOfRange { chunk_number: u32, total_chunks: u32 },

    // ===== 完整性错误 =====
    #[error("上传未完成: 缺失分片 {missing:?}")]
    IncompleteUpload { missing: Vec<u32> },

    #[error("完整性校验失败: {0}")]
    Integrity(String),

    #[error("上传尚未拼接: {0}")]
    NotFinalized(String),

    // ===== IO 错误 =====
    #[error("文件读写失败: {0}")]
    Io(String),

    #[error("制品存储失败: {0}")]
    ArtifactStore(String),

    #[error("锁获取失败: {0}")]
    LockError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::Io(err.to_string())
    }
}

impl From<tempfile::PersistError> for UploadError {
    fn from(err: tempfile::PersistError) -> Self {
        UploadError::Io(err.error.to_string())
    }
}

impl From<RepositoryError> for UploadError {
    fn from(err: RepositoryError) -> Self {
        UploadError::ArtifactStore(err.to_string())
    }
}

/// Result 类型别名
pub type UploadResult<T> = Result<T, UploadError>;
