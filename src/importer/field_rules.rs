// ==========================================
// 批量导入导出引擎 - 声明式字段规则求值
// ==========================================
// 职责: 对 FieldRule 列表逐条求值，产出 VALIDATION_ERROR
// 约定: 除 Required 外，空值跳过其余规则
//       正则为整串匹配（自动加 ^(?:...)$）
// ==========================================

use crate::domain::row::{RowError, RowRecord, RowSchema};
use crate::domain::rule::{FieldRule, RuleKind};
use crate::domain::types::ErrorCategory;
use crate::importer::error::{ImportError, ImportResult};
use regex::Regex;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::error;

// ==========================================
// RuleEngine - 规则引擎
// ==========================================
#[derive(Debug, Default)]
pub struct RuleEngine {
    regex_cache: RwLock<HashMap<String, Regex>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预编译规则中的正则并写入缓存（注册阶段调用）
    ///
    /// # 错误
    /// - InvalidRule: 正则无效，或范围上下限颠倒
    pub fn prepare(&self, rules: &[FieldRule]) -> ImportResult<()> {
        for rule in rules {
            match &rule.kind {
                RuleKind::Pattern { regex } => {
                    self.compiled(regex).map_err(|e| ImportError::InvalidRule {
                        field: rule.field.clone(),
                        message: e.to_string(),
                    })?;
                }
                RuleKind::LengthRange {
                    min: Some(min),
                    max: Some(max),
                } if min > max => {
                    return Err(ImportError::InvalidRule {
                        field: rule.field.clone(),
                        message: format!("长度下限 {} 大于上限 {}", min, max),
                    });
                }
                RuleKind::NumericRange {
                    min: Some(min),
                    max: Some(max),
                } if min > max => {
                    return Err(ImportError::InvalidRule {
                        field: rule.field.clone(),
                        message: format!("数值下限 {} 大于上限 {}", min, max),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// 正则是否已在缓存中
    pub fn is_compiled(&self, pattern: &str) -> bool {
        self.regex_cache
            .read()
            .map(|cache| cache.contains_key(pattern))
            .unwrap_or(false)
    }

    fn compiled(&self, pattern: &str) -> Result<Regex, regex::Error> {
        if let Ok(cache) = self.regex_cache.read() {
            if let Some(re) = cache.get(pattern) {
                return Ok(re.clone());
            }
        }
        let re = Regex::new(&format!("^(?:{})$", pattern))?;
        if let Ok(mut cache) = self.regex_cache.write() {
            cache.insert(pattern.to_string(), re.clone());
        }
        Ok(re)
    }

    /// 对一行求值全部规则（不短路，错误累积）
    pub fn evaluate(&self, row: &RowRecord, schema: &RowSchema, rules: &[FieldRule]) -> Vec<RowError> {
        rules
            .iter()
            .filter_map(|rule| {
                self.check(row, schema, rule).map(|default_message| {
                    RowError::for_field(
                        row,
                        schema,
                        &rule.field,
                        ErrorCategory::ValidationError,
                        rule.message.clone().unwrap_or(default_message),
                    )
                })
            })
            .collect()
    }

    /// 单条规则求值，违反时返回默认错误描述
    fn check(&self, row: &RowRecord, schema: &RowSchema, rule: &FieldRule) -> Option<String> {
        let header = schema.header_of(&rule.field);
        let value = row.non_empty(&rule.field);

        if rule.kind == RuleKind::Required {
            return value.is_none().then(|| format!("{}不能为空", header));
        }
        let value = value?;

        match &rule.kind {
            RuleKind::Required => None,
            RuleKind::Pattern { regex } => match self.compiled(regex) {
                Ok(re) => (!re.is_match(value)).then(|| format!("{}格式不正确", header)),
                Err(e) => {
                    error!(field = %rule.field, error = %e, "正则规则无效，已跳过");
                    None
                }
            },
            RuleKind::LengthRange { min, max } => {
                let len = value.chars().count();
                let too_short = min.map_or(false, |m| len < m);
                let too_long = max.map_or(false, |m| len > m);
                if !(too_short || too_long) {
                    return None;
                }
                Some(match (min, max) {
                    (Some(min), Some(max)) => format!("{}长度必须在{}到{}之间", header, min, max),
                    (Some(min), None) => format!("{}长度不能少于{}", header, min),
                    (None, Some(max)) => format!("{}长度不能超过{}", header, max),
                    (None, None) => format!("{}长度不合法", header),
                })
            }
            RuleKind::EnumMembership { values } => (!values.iter().any(|v| v == value))
                .then(|| format!("{}取值必须为: {}", header, values.join("/"))),
            RuleKind::NumericRange { min, max } => {
                let Ok(number) = value.parse::<f64>() else {
                    return Some(format!("{}必须为数字", header));
                };
                let below = min.map_or(false, |m| number < m);
                let above = max.map_or(false, |m| number > m);
                if !(below || above) {
                    return None;
                }
                Some(match (min, max) {
                    (Some(min), Some(max)) => format!("{}必须在{}到{}之间", header, min, max),
                    (Some(min), None) => format!("{}不能小于{}", header, min),
                    (None, Some(max)) => format!("{}不能大于{}", header, max),
                    (None, None) => format!("{}超出范围", header),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> RowSchema {
        RowSchema::from_pairs(&[
            ("username", "用户名"),
            ("phone", "手机号"),
            ("status", "状态"),
            ("age", "年龄"),
        ])
    }

    #[test]
    fn test_required_and_empty_skip() {
        let engine = RuleEngine::new();
        let rules = vec![
            FieldRule::required("username"),
            FieldRule::pattern("phone", r"1\d{10}"),
        ];
        let row = RowRecord::from_pairs(1, &[("username", "  "), ("phone", "")]);

        let errors = engine.evaluate(&row, &schema(), &rules);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "username");
        assert_eq!(errors[0].column, "用户名");
        assert_eq!(errors[0].message, "用户名不能为空");
        assert_eq!(errors[0].category, ErrorCategory::ValidationError);
    }

    #[test]
    fn test_pattern_is_whole_match() {
        let engine = RuleEngine::new();
        let rules = vec![FieldRule::pattern("phone", r"1\d{10}")];

        let ok = RowRecord::from_pairs(1, &[("phone", "13800138000")]);
        let bad = RowRecord::from_pairs(2, &[("phone", "x13800138000y")]);

        assert!(engine.evaluate(&ok, &schema(), &rules).is_empty());
        let errors = engine.evaluate(&bad, &schema(), &rules);
        assert_eq!(errors[0].raw_value, "x13800138000y");
    }

    #[test]
    fn test_length_counts_chars() {
        let engine = RuleEngine::new();
        let rules = vec![FieldRule::length("username", Some(2), Some(4))];

        let chinese = RowRecord::from_pairs(1, &[("username", "张三丰")]);
        let long = RowRecord::from_pairs(2, &[("username", "abcde")]);

        assert!(engine.evaluate(&chinese, &schema(), &rules).is_empty());
        assert_eq!(
            engine.evaluate(&long, &schema(), &rules)[0].message,
            "用户名长度必须在2到4之间"
        );
    }

    #[test]
    fn test_enum_numeric_and_custom_message() {
        let engine = RuleEngine::new();
        let rules = vec![
            FieldRule::one_of("status", &["0", "1"]).with_message("状态只能是0或1"),
            FieldRule::numeric("age", Some(0.0), Some(150.0)),
        ];
        let row = RowRecord::from_pairs(1, &[("status", "2"), ("age", "abc")]);

        let errors = engine.evaluate(&row, &schema(), &rules);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "状态只能是0或1");
        assert_eq!(errors[1].message, "年龄必须为数字");

        let row = RowRecord::from_pairs(2, &[("status", "1"), ("age", "200")]);
        let errors = engine.evaluate(&row, &schema(), &rules);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "年龄必须在0到150之间");
    }

    #[test]
    fn test_prepare_rejects_bad_rules() {
        let engine = RuleEngine::new();

        assert!(matches!(
            engine.prepare(&[FieldRule::pattern("phone", "(")]),
            Err(ImportError::InvalidRule { .. })
        ));
        assert!(matches!(
            engine.prepare(&[FieldRule::length("username", Some(5), Some(2))]),
            Err(ImportError::InvalidRule { .. })
        ));
        assert!(engine.prepare(&[FieldRule::pattern("phone", r"\d+")]).is_ok());
    }
}
