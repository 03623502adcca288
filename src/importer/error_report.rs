// ==========================================
// 批量导入导出引擎 - 错误报告生成
// ==========================================
// 列: 行号 / 列名 / 原始值 / 错误类型 / 错误信息
// 说明: 零错误时生成仅含表头的文件；
//       .xls 导入的报告以 .xlsx 输出（.xls 不可写）
// ==========================================

use crate::domain::row::{RowError, RowRecord, RowSchema};
use crate::domain::task::ArtifactRef;
use crate::domain::types::FileFormat;
use crate::importer::error::ImportResult;
use crate::importer::file_parser::SpreadsheetCodec;
use crate::repository::artifact_store::ArtifactStore;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tracing::info;

const REPORT_SHEET_NAME: &str = "错误报告";

/// 错误报告列结构
pub fn report_schema() -> RowSchema {
    RowSchema::from_pairs(&[
        ("row_number", "行号"),
        ("column", "列名"),
        ("raw_value", "原始值"),
        ("category", "错误类型"),
        ("message", "错误信息"),
    ])
}

fn to_record(index: usize, error: &RowError) -> RowRecord {
    let mut values = HashMap::with_capacity(5);
    values.insert("row_number".to_string(), error.row_number.to_string());
    values.insert("column".to_string(), error.column.clone());
    values.insert("raw_value".to_string(), error.raw_value.clone());
    values.insert(
        "category".to_string(),
        error.category.display_name().to_string(),
    );
    values.insert("message".to_string(), error.message.clone());
    RowRecord::new(index + 1, values)
}

// ==========================================
// ErrorReportBuilder
// ==========================================
pub struct ErrorReportBuilder {
    codec: SpreadsheetCodec,
    store: Arc<dyn ArtifactStore>,
}

impl ErrorReportBuilder {
    pub fn new(codec: SpreadsheetCodec, store: Arc<dyn ArtifactStore>) -> Self {
        Self { codec, store }
    }

    /// 生成错误报告并保存为制品
    ///
    /// # 参数
    /// - errors: 行错误（按给定顺序逐行写出）
    /// - format: 任务文件格式
    pub fn build(&self, task_id: &str, errors: &[RowError], format: FileFormat) -> ImportResult<ArtifactRef> {
        let format = if format.is_writable() {
            format
        } else {
            FileFormat::Xlsx
        };

        let records: Vec<RowRecord> = errors
            .iter()
            .enumerate()
            .map(|(idx, e)| to_record(idx, e))
            .collect();

        let mut buffer = Cursor::new(Vec::new());
        self.codec
            .write_rows(&mut buffer, format, &report_schema(), &records, REPORT_SHEET_NAME)?;
        let buffer = buffer.into_inner();

        let name = format!("error_report_{}{}", task_id, format.extension());
        let artifact = self.store.save(&name, &buffer)?;

        info!(task_id, errors = errors.len(), artifact = %artifact, "错误报告已生成");
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ErrorCategory;
    use crate::repository::artifact_store::LocalArtifactStore;
    use std::io::Read;
    use tempfile::TempDir;

    fn builder(dir: &TempDir) -> (ErrorReportBuilder, Arc<LocalArtifactStore>) {
        let store = Arc::new(LocalArtifactStore::new(dir.path()).unwrap());
        (
            ErrorReportBuilder::new(SpreadsheetCodec::new(1000), store.clone()),
            store,
        )
    }

    fn read_text(store: &LocalArtifactStore, artifact: &ArtifactRef) -> String {
        let mut text = String::new();
        store.open(artifact).unwrap().read_to_string(&mut text).unwrap();
        text.trim_start_matches('\u{feff}').to_string()
    }

    #[test]
    fn test_report_rows_follow_errors() {
        let dir = TempDir::new().unwrap();
        let (builder, store) = builder(&dir);
        let errors = vec![
            RowError::new(2, "username", "用户名", "", ErrorCategory::ValidationError, "用户名不能为空"),
            RowError::new(3, "email", "邮箱", "bad", ErrorCategory::FormatError, "邮箱格式不正确"),
        ];

        let artifact = builder.build("t1", &errors, FileFormat::Csv).unwrap();

        let text = read_text(&store, &artifact);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "行号,列名,原始值,错误类型,错误信息");
        assert_eq!(lines[1], "2,用户名,,校验错误,用户名不能为空");
        assert_eq!(lines[2], "3,邮箱,bad,格式错误,邮箱格式不正确");
        assert!(artifact.as_str().ends_with("error_report_t1.csv"));
    }

    #[test]
    fn test_zero_errors_header_only() {
        let dir = TempDir::new().unwrap();
        let (builder, store) = builder(&dir);

        let artifact = builder.build("t2", &[], FileFormat::Csv).unwrap();

        let text = read_text(&store, &artifact);
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_xls_report_written_as_xlsx() {
        let dir = TempDir::new().unwrap();
        let (builder, _store) = builder(&dir);

        let artifact = builder.build("t3", &[], FileFormat::Xls).unwrap();
        assert!(artifact.as_str().ends_with(".xlsx"));
    }
}
