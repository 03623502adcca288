// ==========================================
// 批量导入导出引擎 - 行校验流水线
// ==========================================
// 顺序: 声明式规则（VALIDATION）→ 自定义校验器 → 批内重复检测（DUPLICATE）
// 约定: 每行不短路，错误累积；结果按行号稳定排序
// ==========================================

use crate::domain::row::{RowError, RowRecord, RowSchema};
use crate::domain::rule::FieldRule;
use crate::importer::conflict_handler::ConflictHandler;
use crate::importer::field_rules::RuleEngine;
use crate::importer::validator_registry::ValidatorRegistry;
use std::sync::Arc;
use tracing::{debug, warn};

// ==========================================
// ValidationPipeline - 校验流水线
// ==========================================
pub struct ValidationPipeline {
    registry: Arc<ValidatorRegistry>,
}

impl ValidationPipeline {
    pub fn new(registry: Arc<ValidatorRegistry>) -> Self {
        Self { registry }
    }

    fn rule_engine(&self) -> &RuleEngine {
        self.registry.rule_engine()
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// 单行声明式规则校验
    pub fn validate_row(
        &self,
        row: &RowRecord,
        schema: &RowSchema,
        rules: &[FieldRule],
    ) -> Vec<RowError> {
        self.rule_engine().evaluate(row, schema, rules)
    }

    /// 批次校验
    ///
    /// # 参数
    /// - rows: 本批行记录（行号由解码器分配）
    /// - data_type: 数据类型键
    ///
    /// # 返回
    /// - 行错误（按行号升序；同一行内保持 规则 → 自定义 → 重复 的顺序）
    /// - 未注册的 data_type 返回空并记录告警
    pub fn validate_batch(&self, rows: &[RowRecord], data_type: &str) -> Vec<RowError> {
        let Some(definition) = self.registry.get(data_type) else {
            warn!(data_type, rows = rows.len(), "数据类型未注册，跳过校验");
            return Vec::new();
        };

        let mut errors = Vec::new();
        for row in rows {
            errors.extend(self.validate_row(row, &definition.schema, &definition.rules));
            if let Some(validator) = &definition.validator {
                errors.extend(validator.validate(row, &definition.schema));
            }
        }
        errors.extend(self.detect_duplicates(rows, &definition.schema, &definition.unique_keys));

        // sort_by_key 为稳定排序
        errors.sort_by_key(|e| e.row_number);

        debug!(data_type, rows = rows.len(), errors = errors.len(), "批次校验完成");
        errors
    }

    /// 批内重复检测
    pub fn detect_duplicates(
        &self,
        rows: &[RowRecord],
        schema: &RowSchema,
        key_fields: &[String],
    ) -> Vec<RowError> {
        ConflictHandler::detect_duplicates(rows, schema, key_fields)
    }
}
