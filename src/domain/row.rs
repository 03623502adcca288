// ==========================================
// 批量导入导出引擎 - 行数据模型
// ==========================================
// 职责: 行记录 / 行错误 / 列定义（字段 ↔ 表头映射）
// 说明: 引擎不感知具体业务行类型（用户/角色等），
//       业务字段通过 RowSchema 显式声明，不做运行时反射
// ==========================================

use crate::domain::types::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ==========================================
// ColumnDef - 列定义
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub field: String,  // 字段键（如 username）
    pub header: String, // 表头标题（如 用户名）
}

impl ColumnDef {
    pub fn new(field: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            header: header.into(),
        }
    }
}

// ==========================================
// RowSchema - 行结构（有序列定义）
// ==========================================
// 用途: 读取时 表头 → 字段键；写出时 字段键 → 表头，列顺序即输出顺序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    pub columns: Vec<ColumnDef>,
}

impl RowSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    /// 由 (字段键, 表头) 列表构造
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            columns: pairs
                .iter()
                .map(|(field, header)| ColumnDef::new(*field, *header))
                .collect(),
        }
    }

    /// 以表头原文作为字段键的通用结构（用于未知业务类型的文件检查）
    pub fn from_headers(headers: &[String]) -> Self {
        Self {
            columns: headers
                .iter()
                .map(|h| ColumnDef::new(h.clone(), h.clone()))
                .collect(),
        }
    }

    /// 表头文本 → 字段键（表头标题或字段键均可匹配）
    pub fn resolve_header(&self, header: &str) -> Option<&str> {
        let header = header.trim();
        self.columns
            .iter()
            .find(|c| c.header == header)
            .or_else(|| self.columns.iter().find(|c| c.field == header))
            .map(|c| c.field.as_str())
    }

    /// 字段键 → 表头标题（未声明的字段返回字段键本身）
    pub fn header_of<'a>(&'a self, field: &'a str) -> &'a str {
        self.columns
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.header.as_str())
            .unwrap_or(field)
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.header.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// ==========================================
// RowRecord - 行记录
// ==========================================
// 行号: 1 起，第 1 行为表头之后的第一条数据行
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRecord {
    pub row_number: usize,
    pub values: HashMap<String, String>,
}

impl RowRecord {
    pub fn new(row_number: usize, values: HashMap<String, String>) -> Self {
        Self { row_number, values }
    }

    /// 由 (字段键, 值) 列表构造
    pub fn from_pairs(row_number: usize, pairs: &[(&str, &str)]) -> Self {
        Self {
            row_number,
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// 为一组无行号的数据按 start_row_number 起连续编号
    pub fn numbered(start_row_number: usize, rows: Vec<HashMap<String, String>>) -> Vec<Self> {
        rows.into_iter()
            .enumerate()
            .map(|(idx, values)| Self::new(start_row_number + idx, values))
            .collect()
    }

    /// 读取字段值（缺失视为空串）
    pub fn value(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or("")
    }

    /// 读取非空字段值（去除首尾空白后为空则返回 None）
    pub fn non_empty(&self, field: &str) -> Option<&str> {
        let v = self.value(field).trim();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    }

    /// 所有字段均为空
    pub fn is_blank(&self) -> bool {
        self.values.values().all(|v| v.trim().is_empty())
    }
}

// ==========================================
// RowError - 行级错误
// ==========================================
// 创建后不再修改；按任务汇总后生成错误报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row_number: usize,       // 数据行号（1 起）
    pub field: String,           // 字段键
    pub column: String,          // 列名（表头标题）
    pub raw_value: String,       // 原始值（文本）
    pub category: ErrorCategory, // 错误类型
    pub message: String,         // 错误描述
}

impl RowError {
    pub fn new(
        row_number: usize,
        field: impl Into<String>,
        column: impl Into<String>,
        raw_value: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_number,
            field: field.into(),
            column: column.into(),
            raw_value: raw_value.into(),
            category,
            message: message.into(),
        }
    }

    /// 针对某一行某一字段构造错误（列名/原始值取自 schema 与行记录）
    pub fn for_field(
        row: &RowRecord,
        schema: &RowSchema,
        field: &str,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            row.row_number,
            field,
            schema.header_of(field),
            row.value(field),
            category,
            message,
        )
    }
}
