// ==========================================
// 批量导入导出引擎 - 仓储层
// ==========================================
// 职责: 任务元数据持久化 / 制品文件存取
// 红线: Repository 不含业务逻辑
// ==========================================

pub mod artifact_store;
pub mod error;
pub mod task_repo;
pub mod task_repo_impl;

pub use artifact_store::{ArtifactStore, LocalArtifactStore, ReadSeek};
pub use error::{RepositoryError, RepositoryResult};
pub use task_repo::TaskStore;
pub use task_repo_impl::SqliteTaskStore;
