// ==========================================
// 批量导入导出引擎 - 核心库
// ==========================================
// 职责: 分片上传重组、表格流式编解码、行校验流水线、
//       异步任务生命周期（进度 / 取消 / 错误报告）
// 技术栈: Rust + tokio + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 任务存储 / 制品存储
pub mod repository;

// 上传层 - 分片重组
pub mod upload;

// 导入层 - 编解码与校验
pub mod importer;

// 引擎层 - 任务生命周期
pub mod engine;

// 配置层 - 引擎配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 调用方接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ErrorCategory, FileFormat, TaskKind, TaskStatus};

// 领域实体
pub use domain::{
    ArtifactRef, ColumnDef, FieldRule, ImportExportTask, RowError, RowRecord, RowSchema,
    TaskPage, TaskRequest, TaskSnapshot,
};

// 引擎
pub use engine::{ArtifactKind, EngineDeps, TaskEngine, TaskError};

// 导入层
pub use importer::{
    DataTypeDefinition, ExportSource, RowPersister, RowValidator, SpreadsheetCodec,
    ValidatorRegistry,
};

// 上传
pub use upload::ChunkAssembler;

// API
pub use api::{ApiError, TransferApi};

// ==========================================
// 常量定义
// ==========================================

// 版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 名称
pub const APP_NAME: &str = "批量导入导出引擎";
