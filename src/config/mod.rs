// ==========================================
// 批量导入导出引擎 - 配置层
// ==========================================
// 职责: 引擎运行参数（上限/批大小/并发度）管理
// 存储: config_kv 表，缺省值见 engine_config
// ==========================================

pub mod config_manager;
pub mod engine_config;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use engine_config::{EngineConfig, EngineConfigReader};
