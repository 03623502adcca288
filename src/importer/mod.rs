// ==========================================
// 批量导入导出引擎 - 导入层
// ==========================================
// 职责: 表格编解码、行校验流水线、错误报告
// 支持: Excel (.xlsx 读写 / .xls 只读), CSV
// ==========================================

// 模块声明
pub mod conflict_handler;
pub mod dq_validator;
pub mod error;
pub mod error_report;
pub mod field_rules;
pub mod file_parser;
pub mod file_writer;
pub mod importer_trait;
pub mod validator_registry;

// 重导出核心类型
pub use conflict_handler::ConflictHandler;
pub use dq_validator::ValidationPipeline;
pub use error::{ImportError, ImportResult};
pub use error_report::ErrorReportBuilder;
pub use field_rules::RuleEngine;
pub use file_parser::{BatchControl, ReadSummary, SpreadsheetCodec};
pub use file_writer::WriteOutcome;
pub use validator_registry::{DataTypeDefinition, ValidatorRegistry};

// 重导出 Trait 接口
pub use importer_trait::{CollaboratorError, ExportSource, RowPersister, RowValidator};
