// ==========================================
// 批量导入导出引擎 - 任务领域模型
// ==========================================
// 红线: 任务计数只由所属任务的执行过程修改；终态后不可变
//       （仅下载计数等制品簿记字段除外）
// ==========================================

use crate::domain::types::{FileFormat, TaskKind, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==========================================
// ArtifactRef - 制品引用
// ==========================================
// 由 ArtifactStore 生成并解析，对调用方不透明
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ==========================================
// TaskRequest - 任务提交请求（调用方视角）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_name: String,
    pub owner: String,
    pub task_kind: TaskKind,
    pub data_type: String,                        // 业务数据类型键（如 user / role）
    pub file_format: FileFormat,
    pub source_artifact: Option<ArtifactRef>,     // 导入：已上传文件
    #[serde(default)]
    pub query_params: serde_json::Value,          // 导出：查询参数
    pub declared_total: Option<u64>,              // 导入：调用方声明的总行数（用于进度）
    pub remark: Option<String>,
}

impl TaskRequest {
    /// 构造导入请求
    pub fn import(
        task_name: impl Into<String>,
        owner: impl Into<String>,
        data_type: impl Into<String>,
        file_format: FileFormat,
        source: ArtifactRef,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            owner: owner.into(),
            task_kind: TaskKind::Import,
            data_type: data_type.into(),
            file_format,
            source_artifact: Some(source),
            query_params: serde_json::Value::Null,
            declared_total: None,
            remark: None,
        }
    }

    /// 构造导出请求
    pub fn export(
        task_name: impl Into<String>,
        owner: impl Into<String>,
        data_type: impl Into<String>,
        file_format: FileFormat,
        query_params: serde_json::Value,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            owner: owner.into(),
            task_kind: TaskKind::Export,
            data_type: data_type.into(),
            file_format,
            source_artifact: None,
            query_params,
            declared_total: None,
            remark: None,
        }
    }
}

// ==========================================
// ImportExportTask - 导入导出任务
// ==========================================
// 对齐: import_export_task 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportExportTask {
    // ===== 主键与归属 =====
    pub task_id: String,
    pub owner: String,
    pub task_name: String,

    // ===== 任务定义 =====
    pub task_kind: TaskKind,
    pub data_type: String,
    pub file_format: FileFormat,
    pub source_artifact: Option<ArtifactRef>,
    pub query_params: serde_json::Value,
    pub declared_total: Option<u64>,
    pub remark: Option<String>,

    // ===== 执行状态 =====
    pub status: TaskStatus,
    pub progress_percent: u8,
    pub total_count: u64,
    pub success_count: u64,
    pub failure_count: u64,

    // ===== 结果 =====
    pub result_artifact: Option<ArtifactRef>,
    pub error_report: Option<ArtifactRef>,
    pub error_message: Option<String>,
    pub download_count: u32,

    // ===== 时间戳 =====
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportExportTask {
    /// 由请求创建 PENDING 任务
    pub fn from_request(request: TaskRequest) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            owner: request.owner,
            task_name: request.task_name,
            task_kind: request.task_kind,
            data_type: request.data_type,
            file_format: request.file_format,
            source_artifact: request.source_artifact,
            query_params: request.query_params,
            declared_total: request.declared_total,
            remark: request.remark,
            status: TaskStatus::Pending,
            progress_percent: 0,
            total_count: 0,
            success_count: 0,
            failure_count: 0,
            result_artifact: None,
            error_report: None,
            error_message: None,
            download_count: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            task_kind: self.task_kind,
            data_type: self.data_type.clone(),
            status: self.status,
            progress_percent: self.progress_percent,
            total_count: self.total_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            error_message: self.error_message.clone(),
            result_artifact: self.result_artifact.clone(),
            error_report: self.error_report.clone(),
            download_count: self.download_count,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

// ==========================================
// TaskSnapshot - 任务状态快照（只读视图）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub task_kind: TaskKind,
    pub data_type: String,
    pub status: TaskStatus,
    pub progress_percent: u8,
    pub total_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub error_message: Option<String>,
    pub result_artifact: Option<ArtifactRef>,
    pub error_report: Option<ArtifactRef>,
    pub download_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ==========================================
// TaskPage - 分页查询结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPage {
    pub items: Vec<TaskSnapshot>,
    pub total: u64,
    pub page_num: u32,
    pub page_size: u32,
}
