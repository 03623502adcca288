// ==========================================
// 批量导入导出引擎 - 导出执行
// ==========================================
// 流程: 分页查询 → 写入临时文件 → 保存为结果制品
// 取消: 每次拉取下一页前检查；取消时临时文件随 guard 删除
// ==========================================

use crate::domain::task::ImportExportTask;
use crate::engine::error::{TaskError, TaskResult};
use crate::engine::task_engine::{BatchProgress, EngineInner, RunOutcome, TaskControl};
use crate::importer::error::ImportError;
use std::fs;
use std::io::{self, Seek, SeekFrom, Write};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

fn write_error(err: io::Error) -> ImportError {
    ImportError::FileWriteError(err.to_string())
}

pub(crate) fn run(
    inner: &EngineInner,
    control: &TaskControl,
    task: &ImportExportTask,
) -> TaskResult<RunOutcome> {
    if !task.file_format.is_writable() {
        return Err(TaskError::UnsupportedFormat(format!(
            "{}（仅可读取）",
            task.file_format
        )));
    }
    let definition = inner.definition(&task.data_type)?;

    let expected_total = match inner
        .export_source
        .estimate_total(&definition.key, &task.query_params)
    {
        Ok(total) => total,
        Err(e) => {
            warn!(task_id = %task.task_id, error = %e, "预估导出行数失败");
            None
        }
    };

    let temp_dir = inner.config.temp_dir();
    fs::create_dir_all(&temp_dir).map_err(write_error)?;
    let mut temp = NamedTempFile::new_in(&temp_dir).map_err(write_error)?;

    let mut progress = BatchProgress::default();
    let outcome = inner.codec.write_rows_batched(
        temp.as_file_mut(),
        task.file_format,
        &definition.schema,
        |offset, limit| {
            if control.is_cancel_requested() {
                return Ok(None);
            }
            let page = inner
                .export_source
                .fetch_page(&definition.key, &task.query_params, offset, limit)
                .map_err(|e| ImportError::SourceError(e.to_string()))?;

            progress.processed += page.len() as u64;
            progress.success = progress.processed;
            debug!(task_id = %task.task_id, offset, rows = page.len(), "导出页已拉取");
            inner
                .record_progress(control, progress, expected_total)
                .map_err(|e| ImportError::InternalError(e.to_string()))?;
            Ok(Some(page))
        },
        &inner.config.default_sheet_name,
        inner.config.batch_size,
    )?;

    if !outcome.completed {
        return Ok(RunOutcome::Cancelled);
    }

    let file = temp.as_file_mut();
    file.flush().map_err(write_error)?;
    file.seek(SeekFrom::Start(0)).map_err(write_error)?;

    let name = format!(
        "{}_export_{}{}",
        definition.key,
        task.task_id,
        task.file_format.extension()
    );
    let artifact = inner.artifact_store.save_stream(&name, file)?;

    control.update(|t| {
        t.total_count = outcome.rows_written;
        t.success_count = outcome.rows_written;
        t.failure_count = 0;
        t.result_artifact = Some(artifact);
    })?;

    Ok(RunOutcome::Completed)
}
