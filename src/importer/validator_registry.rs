// ==========================================
// 批量导入导出引擎 - 数据类型注册表
// ==========================================
// 职责: data_type 键 → 列结构 / 字段规则 / 唯一键 / 自定义校验器
// 生命周期: 启动时构造并注入引擎，运行期只读
// ==========================================

use crate::domain::row::RowSchema;
use crate::domain::rule::FieldRule;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_rules::RuleEngine;
use crate::importer::importer_trait::RowValidator;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

// ==========================================
// DataTypeDefinition - 业务数据类型定义
// ==========================================
#[derive(Clone)]
pub struct DataTypeDefinition {
    pub key: String,
    pub display_name: String,
    pub schema: RowSchema,
    pub rules: Vec<FieldRule>,
    pub unique_keys: Vec<String>,
    pub validator: Option<Arc<dyn RowValidator>>,
}

impl DataTypeDefinition {
    pub fn new(key: impl Into<String>, schema: RowSchema) -> Self {
        let key = key.into();
        Self {
            display_name: key.clone(),
            key,
            schema,
            rules: Vec::new(),
            unique_keys: Vec::new(),
            validator: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_rules(mut self, rules: Vec<FieldRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_unique_keys(mut self, keys: &[&str]) -> Self {
        self.unique_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_validator(mut self, validator: impl RowValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

impl fmt::Debug for DataTypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTypeDefinition")
            .field("key", &self.key)
            .field("display_name", &self.display_name)
            .field("columns", &self.schema.columns.len())
            .field("rules", &self.rules.len())
            .field("unique_keys", &self.unique_keys)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

// ==========================================
// ValidatorRegistry - 注册表
// ==========================================
#[derive(Debug, Default)]
pub struct ValidatorRegistry {
    definitions: HashMap<String, Arc<DataTypeDefinition>>,
    rule_engine: RuleEngine, // 注册时编译的正则缓存，供校验流水线复用
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册数据类型，并把规则中的正则编译进共享的规则引擎
    ///
    /// # 错误
    /// - DuplicateDataType: 同键数据类型已注册
    /// - InvalidRule: 规则引用了未声明的字段，或规则参数无效
    pub fn register(&mut self, definition: DataTypeDefinition) -> ImportResult<()> {
        if self.definitions.contains_key(&definition.key) {
            return Err(ImportError::DuplicateDataType(definition.key.clone()));
        }
        let declared = |field: &str| definition.schema.columns.iter().any(|c| c.field == field);

        if let Some(rule) = definition.rules.iter().find(|r| !declared(r.field.as_str())) {
            return Err(ImportError::InvalidRule {
                field: rule.field.clone(),
                message: format!("字段未在数据类型 {} 的列结构中声明", definition.key),
            });
        }
        if let Some(key) = definition.unique_keys.iter().find(|k| !declared(k.as_str())) {
            return Err(ImportError::InvalidRule {
                field: key.clone(),
                message: format!("唯一键未在数据类型 {} 的列结构中声明", definition.key),
            });
        }
        self.rule_engine.prepare(&definition.rules)?;

        info!(
            data_type = %definition.key,
            columns = definition.schema.columns.len(),
            rules = definition.rules.len(),
            "数据类型已注册"
        );
        self.definitions
            .insert(definition.key.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn rule_engine(&self) -> &RuleEngine {
        &self.rule_engine
    }

    pub fn get(&self, key: &str) -> Option<Arc<DataTypeDefinition>> {
        self.definitions.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.definitions.contains_key(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::row::{RowError, RowRecord};

    fn user_definition() -> DataTypeDefinition {
        DataTypeDefinition::new(
            "user",
            RowSchema::from_pairs(&[("username", "用户名"), ("email", "邮箱")]),
        )
        .with_display_name("用户")
        .with_rules(vec![FieldRule::required("username")])
        .with_unique_keys(&["username"])
        .with_validator(|_: &RowRecord, _: &RowSchema| Vec::<RowError>::new())
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ValidatorRegistry::new();
        registry.register(user_definition()).unwrap();

        let definition = registry.get("user").unwrap();
        assert_eq!(definition.display_name, "用户");
        assert!(definition.validator.is_some());
        assert!(registry.get("role").is_none());
        assert_eq!(registry.keys(), vec!["user"]);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut registry = ValidatorRegistry::new();
        registry.register(user_definition()).unwrap();

        let again = user_definition().with_display_name("账号");
        assert!(matches!(
            registry.register(again),
            Err(ImportError::DuplicateDataType(key)) if key == "user"
        ));
        assert_eq!(registry.get("user").unwrap().display_name, "用户");
    }

    #[test]
    fn test_patterns_compiled_at_registration() {
        let mut registry = ValidatorRegistry::new();
        let definition = user_definition()
            .with_rules(vec![FieldRule::pattern("email", r"[^@]+@[^@]+")]);
        registry.register(definition).unwrap();

        assert!(registry.rule_engine().is_compiled(r"[^@]+@[^@]+"));
        assert!(!registry.rule_engine().is_compiled(r"\d+"));
    }

    #[test]
    fn test_rule_on_undeclared_field_rejected() {
        let mut registry = ValidatorRegistry::new();
        let definition = user_definition().with_rules(vec![FieldRule::required("phone")]);

        assert!(matches!(
            registry.register(definition),
            Err(ImportError::InvalidRule { field, .. }) if field == "phone"
        ));
        assert!(!registry.contains("user"));
    }
}
