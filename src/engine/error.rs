// ==========================================
// 批量导入导出引擎 - 任务引擎错误类型
// ==========================================
// 说明: 任务失败时写入 error_message 的是 public_message()，
//       不包含内部路径/SQL 等细节，且长度受限
// ==========================================

use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 任务引擎错误类型
#[derive(Error, Debug)]
pub enum TaskError {
    // ===== 请求错误 =====
    #[error("任务不存在: {0}")]
    NotFound(String),

    #[error("任务请求无效: {0}")]
    InvalidRequest(String),

    #[error("数据类型未注册: {0}")]
    UnknownDataType(String),

    #[error("文件格式不支持: {0}")]
    UnsupportedFormat(String),

    // ===== 状态机错误 =====
    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("任务正在执行: {0}")]
    TaskAlreadyRunning(String),

    // ===== 执行错误 =====
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("任务调度失败: {0}")]
    Scheduling(String),

    #[error("锁获取失败: {0}")]
    LockError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    /// 对外展示的错误信息（脱敏 + 截断到 max_len 个字符）
    pub fn public_message(&self, max_len: usize) -> String {
        let message = match self {
            TaskError::Import(ImportError::RowLimitExceeded { .. })
            | TaskError::Import(ImportError::UnsupportedFormat(_))
            | TaskError::Import(ImportError::UnknownDataType(_))
            | TaskError::UnknownDataType(_)
            | TaskError::UnsupportedFormat(_)
            | TaskError::InvalidRequest(_) => self.to_string(),
            TaskError::Import(ImportError::CsvParseError(_))
            | TaskError::Import(ImportError::ExcelParseError(_))
            | TaskError::Import(ImportError::FileReadError(_)) => {
                "文件解析失败，请检查文件内容与格式".to_string()
            }
            TaskError::Import(ImportError::PersistError(_)) => "业务数据写入失败".to_string(),
            TaskError::Import(ImportError::SourceError(_)) => "导出数据查询失败".to_string(),
            TaskError::Import(ImportError::FileWriteError(_))
            | TaskError::Import(ImportError::ArtifactError(_))
            | TaskError::Repository(RepositoryError::ArtifactIo(_))
            | TaskError::Repository(RepositoryError::InvalidArtifactRef(_)) => {
                "文件存储异常".to_string()
            }
            TaskError::Repository(RepositoryError::NotFound { .. }) | TaskError::NotFound(_) => {
                "关联数据不存在".to_string()
            }
            TaskError::Repository(_) => "任务数据存储异常".to_string(),
            _ => "任务执行异常".to_string(),
        };
        truncate_chars(&message, max_len)
    }
}

fn truncate_chars(message: &str, max_len: usize) -> String {
    match message.char_indices().nth(max_len) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

/// Result 类型别名
pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_internal_details() {
        let err = TaskError::Import(ImportError::CsvParseError(
            "/var/lib/data/uploads/abc.csv: line 3".to_string(),
        ));
        let message = err.public_message(500);
        assert!(!message.contains("/var/lib"));

        let err = TaskError::Repository(RepositoryError::DatabaseQueryError(
            "no such table: import_export_task".to_string(),
        ));
        assert!(!err.public_message(500).contains("import_export_task"));
    }

    #[test]
    fn test_public_message_keeps_row_limit_and_truncates() {
        let err = TaskError::Import(ImportError::RowLimitExceeded { limit: 100 });
        assert_eq!(err.public_message(500), "导入行数超过上限: 100");
        assert_eq!(err.public_message(4).chars().count(), 4);
    }
}
