// ==========================================
// 批量导入导出引擎 - API层错误类型
// ==========================================
// 职责: 汇总上传 / 导入 / 存储 / 任务各层错误，转换为调用方可读的错误
// ==========================================

use crate::engine::error::TaskError;
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use crate::upload::error::UploadError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 请求错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("文件格式不支持: {0}")]
    UnsupportedFormat(String),

    // ==========================================
    // 上传错误
    // ==========================================
    #[error("文件过大: {size} 字节（上限 {limit} 字节）")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("上传未完成，缺少分片: {missing:?}")]
    IncompleteUpload { missing: Vec<u32> },

    #[error("文件校验失败: {0}")]
    IntegrityError(String),

    // ==========================================
    // 任务错误
    // ==========================================
    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("任务正在执行: {0}")]
    TaskAlreadyRunning(String),

    #[error("文件导入失败: {0}")]
    ImportError(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("文件存储错误: {0}")]
    StorageError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::InvalidInput(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::ArtifactIo(msg) => ApiError::StorageError(msg),
            RepositoryError::InvalidArtifactRef(msg) => {
                ApiError::InvalidInput(format!("制品引用无效: {}", msg))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 UploadError 转换
// ==========================================
impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::SessionNotFound(id) => ApiError::NotFound(format!("上传会话 {}", id)),
            UploadError::InvalidRequest(msg) => ApiError::InvalidInput(msg),
            UploadError::FileTooLarge { size, limit } => ApiError::FileTooLarge { size, limit },
            err @ UploadError::ChunkOutOfRange { .. } => ApiError::InvalidInput(err.to_string()),
            UploadError::IncompleteUpload { missing } => ApiError::IncompleteUpload { missing },
            UploadError::Integrity(msg) => ApiError::IntegrityError(msg),
            err @ UploadError::NotFinalized(_) => ApiError::InvalidInput(err.to_string()),
            UploadError::Io(msg) | UploadError::ArtifactStore(msg) => ApiError::StorageError(msg),
            UploadError::LockError(msg) => ApiError::InternalError(format!("锁获取失败: {}", msg)),
            UploadError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::UnsupportedFormat(msg) => ApiError::UnsupportedFormat(msg),
            ImportError::UnknownDataType(key) => {
                ApiError::NotFound(format!("数据类型 {}", key))
            }
            err @ (ImportError::InvalidRule { .. } | ImportError::DuplicateDataType(_)) => {
                ApiError::InvalidInput(err.to_string())
            }
            ImportError::Other(err) => ApiError::Other(err),
            other => ApiError::ImportError(other.to_string()),
        }
    }
}

// ==========================================
// 从 TaskError 转换
// ==========================================
impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(id) => ApiError::NotFound(format!("任务 {}", id)),
            TaskError::InvalidRequest(msg) => ApiError::InvalidInput(msg),
            TaskError::UnknownDataType(key) => ApiError::NotFound(format!("数据类型 {}", key)),
            TaskError::UnsupportedFormat(msg) => ApiError::UnsupportedFormat(msg),
            TaskError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            TaskError::TaskAlreadyRunning(id) => ApiError::TaskAlreadyRunning(id),
            TaskError::Import(err) => err.into(),
            TaskError::Repository(err) => err.into(),
            TaskError::Scheduling(msg) => ApiError::InternalError(format!("任务调度失败: {}", msg)),
            TaskError::LockError(msg) => ApiError::InternalError(format!("锁获取失败: {}", msg)),
            TaskError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_errors_keep_details() {
        let err: ApiError = UploadError::IncompleteUpload { missing: vec![2, 5] }.into();
        match err {
            ApiError::IncompleteUpload { missing } => assert_eq!(missing, vec![2, 5]),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_task_errors_unwrap_nested_layers() {
        let err: ApiError =
            TaskError::Import(ImportError::UnsupportedFormat("xls".to_string())).into();
        assert!(matches!(err, ApiError::UnsupportedFormat(_)));

        let err: ApiError = TaskError::Repository(RepositoryError::NotFound {
            entity: "ImportExportTask".to_string(),
            id: "t1".to_string(),
        })
        .into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
