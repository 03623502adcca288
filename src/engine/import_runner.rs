// ==========================================
// 批量导入导出引擎 - 导入执行
// ==========================================
// 流程: 打开源文件 → 分批读取 → 校验 → 有效行落库 → 更新进度 → 检查取消
//       → 结束后生成错误报告（存在失败行时）
// 约定: 失败行数按行计（同一行多条错误只计一次）；格式错误行也计入
// ==========================================

use crate::domain::row::{RowError, RowRecord};
use crate::domain::task::{ArtifactRef, ImportExportTask};
use crate::domain::types::FileFormat;
use crate::engine::error::{TaskError, TaskResult};
use crate::engine::task_engine::{BatchProgress, EngineInner, RunOutcome, TaskControl};
use crate::importer::error::ImportError;
use crate::importer::file_parser::BatchControl;
use std::cell::RefCell;
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Default)]
struct ImportTally {
    progress: BatchProgress,
    errors: Vec<RowError>,
}

pub(crate) fn run(
    inner: &EngineInner,
    control: &TaskControl,
    task: &ImportExportTask,
) -> TaskResult<RunOutcome> {
    let definition = inner.definition(&task.data_type)?;
    let source = task
        .source_artifact
        .as_ref()
        .ok_or_else(|| TaskError::InvalidRequest("导入任务缺少源文件".to_string()))?;

    let expected_total = match task.declared_total {
        Some(total) => Some(total),
        None => estimate_total(inner, source, task.file_format),
    };

    let tally = RefCell::new(ImportTally::default());
    let reader = inner.artifact_store.open(source)?;

    let summary = inner.codec.read_rows(
        reader,
        task.file_format,
        &definition.schema,
        inner.config.batch_size,
        |batch| {
            let batch_len = batch.len();
            let errors = inner.pipeline.validate_batch(&batch, &definition.key);
            let failed_rows: BTreeSet<usize> = errors.iter().map(|e| e.row_number).collect();
            let valid: Vec<RowRecord> = batch
                .into_iter()
                .filter(|row| !failed_rows.contains(&row.row_number))
                .collect();

            if !valid.is_empty() {
                let written = inner
                    .persister
                    .persist_batch(&definition.key, &valid)
                    .map_err(|e| ImportError::PersistError(e.to_string()))?;
                if written != valid.len() {
                    warn!(
                        task_id = %task.task_id,
                        expected = valid.len(),
                        written,
                        "落库行数与有效行数不一致"
                    );
                }
            }

            let progress = {
                let mut tally = tally.borrow_mut();
                tally.progress.processed += batch_len as u64;
                tally.progress.success += valid.len() as u64;
                tally.progress.failure += failed_rows.len() as u64;
                tally.errors.extend(errors);
                tally.progress
            };
            debug!(
                task_id = %task.task_id,
                rows = batch_len,
                failed = failed_rows.len(),
                processed = progress.processed,
                "批次处理完成"
            );

            inner
                .record_progress(control, progress, expected_total)
                .map_err(|e| ImportError::InternalError(e.to_string()))?;

            if control.is_cancel_requested() {
                Ok(BatchControl::Stop)
            } else {
                Ok(BatchControl::Continue)
            }
        },
        |row_error| {
            let mut tally = tally.borrow_mut();
            tally.progress.processed += 1;
            tally.progress.failure += 1;
            tally.errors.push(row_error);
            Ok(())
        },
    )?;

    let ImportTally {
        progress,
        mut errors,
    } = tally.into_inner();

    control.update(|t| {
        t.total_count = summary.total_rows as u64;
        t.success_count = progress.success;
        t.failure_count = progress.failure;
    })?;

    if summary.stopped_early {
        return Ok(RunOutcome::Cancelled);
    }

    if !errors.is_empty() {
        // 格式错误行在读取时即时回调，需与批次错误一起按行号重排
        errors.sort_by_key(|e| e.row_number);
        let report = inner
            .report_builder
            .build(&task.task_id, &errors, task.file_format)?;
        control.update(|t| t.error_report = Some(report))?;
    }

    Ok(RunOutcome::Completed)
}

/// 预估数据行数；失败时不影响导入，仅进度按未知处理
fn estimate_total(inner: &EngineInner, source: &ArtifactRef, format: FileFormat) -> Option<u64> {
    let reader = match inner.artifact_store.open(source) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(artifact = %source, error = %e, "无法打开源文件预估行数");
            return None;
        }
    };
    match inner.codec.estimate_row_count(reader, format) {
        Ok(total) => Some(total),
        Err(e) => {
            warn!(artifact = %source, error = %e, "预估行数失败");
            None
        }
    }
}
