// ==========================================
// 批量导入导出引擎 - 引擎层
// ==========================================
// 职责: 任务生命周期、异步调度、导入 / 导出执行
// ==========================================

pub mod error;
mod export_runner;
mod import_runner;
pub mod task_engine;

pub use error::{TaskError, TaskResult};
pub use task_engine::{ArtifactKind, EngineDeps, TaskEngine};
