// ==========================================
// 批量导入导出引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod row;
pub mod rule;
pub mod task;
pub mod types;
pub mod upload;

// 重导出核心类型
pub use row::{ColumnDef, RowError, RowRecord, RowSchema};
pub use rule::{FieldRule, RuleKind};
pub use task::{ArtifactRef, ImportExportTask, TaskPage, TaskRequest, TaskSnapshot};
pub use types::{ErrorCategory, FileFormat, TaskKind, TaskStatus};
pub use upload::{AssembledFile, SessionStatus, UploadSession};
