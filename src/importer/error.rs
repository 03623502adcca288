// ==========================================
// 批量导入导出引擎 - 导入模块错误类型
// ==========================================
// 覆盖: 表格编解码 / 校验规则注册 / 错误报告生成
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件格式不支持: {0}（仅支持 .xlsx/.xls/.csv，.xls 仅可读取）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("文件写出失败: {0}")]
    FileWriteError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("文件缺少表头")]
    MissingHeader,

    // ===== 数据量错误 =====
    #[error("导入行数超过上限: {limit}")]
    RowLimitExceeded { limit: usize },

    // ===== 规则错误 =====
    #[error("校验规则无效 (字段 {field}): {message}")]
    InvalidRule { field: String, message: String },

    #[error("数据类型未注册: {0}")]
    UnknownDataType(String),

    #[error("数据类型重复注册: {0}")]
    DuplicateDataType(String),

    // ===== 协作方错误 =====
    #[error("数据源读取失败: {0}")]
    SourceError(String),

    #[error("数据持久化失败: {0}")]
    PersistError(String),

    #[error("制品存储失败: {0}")]
    ArtifactError(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

impl From<calamine::XlsError> for ImportError {
    fn from(err: calamine::XlsError) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for ImportError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        ImportError::FileWriteError(err.to_string())
    }
}

impl From<regex::Error> for ImportError {
    fn from(err: regex::Error) -> Self {
        ImportError::InvalidRule {
            field: String::new(),
            message: err.to_string(),
        }
    }
}

impl From<RepositoryError> for ImportError {
    fn from(err: RepositoryError) -> Self {
        ImportError::ArtifactError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
