// ==========================================
// 批量导入导出引擎 - 任务存储接口
// ==========================================
// 红线: Repository 不含业务逻辑（状态机校验在引擎层）
// ==========================================

use crate::domain::task::{ImportExportTask, TaskPage};
use crate::repository::error::RepositoryResult;

// ==========================================
// TaskStore Trait
// ==========================================
// 实现者: SqliteTaskStore（import_export_task 表）
pub trait TaskStore: Send + Sync {
    /// 新建任务
    fn create_task(&self, task: &ImportExportTask) -> RepositoryResult<()>;

    /// 整体覆写任务（按 task_id）
    ///
    /// # 错误
    /// - NotFound: 任务不存在
    fn update_task(&self, task: &ImportExportTask) -> RepositoryResult<()>;

    /// 按 ID 查询
    ///
    /// # 返回
    /// - Ok(Some(task)): 找到
    /// - Ok(None): 不存在
    fn get_task(&self, task_id: &str) -> RepositoryResult<Option<ImportExportTask>>;

    /// 按归属人分页查询（创建时间倒序）
    ///
    /// # 参数
    /// - page_num: 页码（1 起）
    /// - page_size: 每页条数
    fn list_tasks_by_owner(
        &self,
        owner: &str,
        page_num: u32,
        page_size: u32,
    ) -> RepositoryResult<TaskPage>;
}
