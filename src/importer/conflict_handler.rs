// ==========================================
// 批量导入导出引擎 - 重复数据检测
// ==========================================
// 职责: 检测同一批次内唯一键重复的行
// 范围: 仅批次内；跨批次/库内唯一性由业务持久化方负责
// ==========================================

use crate::domain::row::{RowError, RowRecord, RowSchema};
use crate::domain::types::ErrorCategory;
use std::collections::HashMap;

pub struct ConflictHandler;

impl ConflictHandler {
    /// 检测同批次内重复唯一键
    ///
    /// # 参数
    /// - key_fields: 组合唯一键字段（全部为空的行不参与比较）
    ///
    /// # 返回
    /// - 每个后出现的重复行一条 DUPLICATE_ERROR，指向最早出现的行
    pub fn detect_duplicates(
        rows: &[RowRecord],
        schema: &RowSchema,
        key_fields: &[String],
    ) -> Vec<RowError> {
        if key_fields.is_empty() {
            return Vec::new();
        }

        let column = key_fields
            .iter()
            .map(|f| schema.header_of(f))
            .collect::<Vec<_>>()
            .join("/");
        let mut first_occurrence: HashMap<Vec<&str>, usize> = HashMap::new();
        let mut duplicates = Vec::new();

        for row in rows {
            let key: Vec<&str> = key_fields.iter().map(|f| row.value(f).trim()).collect();
            if key.iter().all(|v| v.is_empty()) {
                continue;
            }

            match first_occurrence.get(&key) {
                Some(first_row) => {
                    duplicates.push(RowError::new(
                        row.row_number,
                        key_fields[0].clone(),
                        column.clone(),
                        key.join("/"),
                        ErrorCategory::DuplicateError,
                        format!("与第 {} 行重复", first_row),
                    ));
                }
                None => {
                    first_occurrence.insert(key, row.row_number);
                }
            }
        }

        duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> RowSchema {
        RowSchema::from_pairs(&[("username", "用户名"), ("dept", "部门")])
    }

    #[test]
    fn test_later_duplicate_reported_against_first() {
        let rows = vec![
            RowRecord::from_pairs(1, &[("username", "A")]),
            RowRecord::from_pairs(2, &[("username", "B")]),
            RowRecord::from_pairs(3, &[("username", "A")]),
        ];

        let errors = ConflictHandler::detect_duplicates(&rows, &schema(), &["username".to_string()]);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_number, 3);
        assert_eq!(errors[0].category, ErrorCategory::DuplicateError);
        assert_eq!(errors[0].message, "与第 1 行重复");
    }

    #[test]
    fn test_triple_occurrence_all_point_to_earliest() {
        let rows = vec![
            RowRecord::from_pairs(4, &[("username", "A")]),
            RowRecord::from_pairs(5, &[("username", "A")]),
            RowRecord::from_pairs(6, &[("username", "A")]),
        ];

        let errors = ConflictHandler::detect_duplicates(&rows, &schema(), &["username".to_string()]);

        let numbers: Vec<usize> = errors.iter().map(|e| e.row_number).collect();
        assert_eq!(numbers, vec![5, 6]);
        assert!(errors.iter().all(|e| e.message == "与第 4 行重复"));
    }

    #[test]
    fn test_composite_key_and_empty_keys() {
        let keys = vec!["username".to_string(), "dept".to_string()];
        let rows = vec![
            RowRecord::from_pairs(1, &[("username", "A"), ("dept", "x")]),
            RowRecord::from_pairs(2, &[("username", "A"), ("dept", "y")]),
            RowRecord::from_pairs(3, &[("username", ""), ("dept", "")]),
            RowRecord::from_pairs(4, &[("username", ""), ("dept", "")]),
            RowRecord::from_pairs(5, &[("username", "A"), ("dept", "x")]),
        ];

        let errors = ConflictHandler::detect_duplicates(&rows, &schema(), &keys);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_number, 5);
        assert_eq!(errors[0].column, "用户名/部门");
        assert_eq!(errors[0].raw_value, "A/x");
    }
}
