// ==========================================
// 批量导入导出引擎 - 声明式字段规则
// ==========================================
// 职责: 字段约束以数据形式表达（可由配置/JSON 加载），
//       由 importer::field_rules::RuleEngine 统一求值
// ==========================================

use serde::{Deserialize, Serialize};

/// 规则类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// 必填
    Required,
    /// 正则匹配（整串匹配）
    Pattern { regex: String },
    /// 长度范围（按字符计）
    LengthRange {
        min: Option<usize>,
        max: Option<usize>,
    },
    /// 枚举取值
    EnumMembership { values: Vec<String> },
    /// 数值范围
    NumericRange { min: Option<f64>, max: Option<f64> },
}

/// 字段规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    #[serde(flatten)]
    pub kind: RuleKind,
    /// 自定义错误信息（为空则使用默认描述）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FieldRule {
    pub fn new(field: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            field: field.into(),
            kind,
            message: None,
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self::new(field, RuleKind::Required)
    }

    pub fn pattern(field: impl Into<String>, regex: impl Into<String>) -> Self {
        Self::new(
            field,
            RuleKind::Pattern {
                regex: regex.into(),
            },
        )
    }

    pub fn length(field: impl Into<String>, min: Option<usize>, max: Option<usize>) -> Self {
        Self::new(field, RuleKind::LengthRange { min, max })
    }

    pub fn one_of(field: impl Into<String>, values: &[&str]) -> Self {
        Self::new(
            field,
            RuleKind::EnumMembership {
                values: values.iter().map(|v| v.to_string()).collect(),
            },
        )
    }

    pub fn numeric(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self::new(field, RuleKind::NumericRange { min, max })
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
