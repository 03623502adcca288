// ==========================================
// 批量导入导出引擎 - 导入导出协作方接口
// ==========================================
// 职责: 定义引擎与业务方之间的接缝
// - RowValidator: 业务自定义行校验（格式检查 / 业务规则）
// - RowPersister: 有效行落库
// - ExportSource: 导出分页查询
// ==========================================

use crate::domain::row::{RowError, RowRecord, RowSchema};
use std::error::Error;

/// 协作方返回的错误
pub type CollaboratorError = Box<dyn Error + Send + Sync>;

// ==========================================
// RowValidator Trait
// ==========================================
// 在声明式规则之后执行；返回的错误类别由实现方决定（FORMAT / VALIDATION）
pub trait RowValidator: Send + Sync {
    fn validate(&self, row: &RowRecord, schema: &RowSchema) -> Vec<RowError>;
}

impl<F> RowValidator for F
where
    F: Fn(&RowRecord, &RowSchema) -> Vec<RowError> + Send + Sync,
{
    fn validate(&self, row: &RowRecord, schema: &RowSchema) -> Vec<RowError> {
        self(row, schema)
    }
}

// ==========================================
// RowPersister Trait
// ==========================================
pub trait RowPersister: Send + Sync {
    /// 持久化一批已通过校验的行
    ///
    /// # 返回
    /// - Ok(n): 成功写入的行数
    /// - Err: 致命错误（任务失败）
    fn persist_batch(&self, data_type: &str, rows: &[RowRecord]) -> Result<usize, CollaboratorError>;
}

// ==========================================
// ExportSource Trait
// ==========================================
pub trait ExportSource: Send + Sync {
    /// 预估导出总行数（用于进度；未知返回 None）
    fn estimate_total(
        &self,
        data_type: &str,
        params: &serde_json::Value,
    ) -> Result<Option<u64>, CollaboratorError>;

    /// 分页查询
    ///
    /// # 参数
    /// - offset: 起始偏移（0 起）
    /// - limit: 本页最大行数；返回不足 limit 行表示已到末尾
    fn fetch_page(
        &self,
        data_type: &str,
        params: &serde_json::Value,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RowRecord>, CollaboratorError>;
}
