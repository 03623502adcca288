// ==========================================
// 批量导入导出引擎 - 领域类型定义
// ==========================================
// 职责: 任务类型 / 任务状态 / 文件格式 / 行错误类型
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 任务类型 (Task Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Import, // 导入
    Export, // 导出
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Import => "IMPORT",
            TaskKind::Export => "EXPORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "IMPORT" => Some(TaskKind::Import),
            "EXPORT" => Some(TaskKind::Export),
            _ => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 任务状态 (Task Status)
// ==========================================
// 状态机:
//   PENDING -> RUNNING -> {SUCCEEDED, FAILED}
//   PENDING | RUNNING -> CANCELLED
// 终态不再迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,   // 等待中
    Running,   // 执行中
    Succeeded, // 成功
    Failed,    // 失败
    Cancelled, // 已取消
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "RUNNING" => Some(TaskStatus::Running),
            "SUCCEEDED" => Some(TaskStatus::Succeeded),
            "FAILED" => Some(TaskStatus::Failed),
            "CANCELLED" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// 是否终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 状态迁移是否合法
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Pending, Cancelled)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 文件格式 (File Format)
// ==========================================
// 由请求字段显式指定，不做内容嗅探
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Xlsx,
    Xls,
    Csv,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Xlsx => "xlsx",
            FileFormat::Xls => "xls",
            FileFormat::Csv => "csv",
        }
    }

    /// 解析格式字段（兼容带点的扩展名，如 ".xlsx"）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "xlsx" => Some(FileFormat::Xlsx),
            "xls" => Some(FileFormat::Xls),
            "csv" => Some(FileFormat::Csv),
            _ => None,
        }
    }

    /// 文件扩展名（带点）
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Xlsx => ".xlsx",
            FileFormat::Xls => ".xls",
            FileFormat::Csv => ".csv",
        }
    }

    /// 是否支持写出（.xls 仅支持读取）
    pub fn is_writable(&self) -> bool {
        !matches!(self, FileFormat::Xls)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 行错误类型 (Error Category)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    ValidationError, // 校验错误（声明式规则 / 业务规则）
    FormatError,     // 格式错误（格式检查 / 行解析失败）
    DuplicateError,  // 重复数据（同批次内）
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ValidationError => "VALIDATION_ERROR",
            ErrorCategory::FormatError => "FORMAT_ERROR",
            ErrorCategory::DuplicateError => "DUPLICATE_ERROR",
        }
    }

    /// 错误报告中展示的名称
    pub fn display_name(&self) -> &'static str {
        match self {
            ErrorCategory::ValidationError => "校验错误",
            ErrorCategory::FormatError => "格式错误",
            ErrorCategory::DuplicateError => "重复数据",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Succeeded));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Cancelled));

        // 不允许跳过 RUNNING
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Succeeded));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
        // 不允许回退
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_terminal_states_never_transition() {
        let all = [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ];
        for terminal in [TaskStatus::Succeeded, TaskStatus::Failed, TaskStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for next in all {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_file_format_parse() {
        assert_eq!(FileFormat::parse("XLSX"), Some(FileFormat::Xlsx));
        assert_eq!(FileFormat::parse(".csv"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::parse("xls"), Some(FileFormat::Xls));
        assert_eq!(FileFormat::parse("ods"), None);
        assert!(!FileFormat::Xls.is_writable());
    }

    #[test]
    fn test_status_str_round_trip() {
        for s in ["PENDING", "RUNNING", "SUCCEEDED", "FAILED", "CANCELLED"] {
            assert_eq!(TaskStatus::parse(s).map(|v| v.as_str()), Some(s));
        }
        assert_eq!(TaskStatus::parse("UNKNOWN"), None);
    }
}
