// ==========================================
// 批量导入导出引擎 - 任务生命周期
// ==========================================
// 状态机: PENDING → RUNNING → {SUCCEEDED, FAILED}
//         PENDING | RUNNING → CANCELLED
// 并发: Semaphore 限制同时执行的任务数，执行体跑在 spawn_blocking 上
// 取消: 协作式，只在批次边界检查
// ==========================================

use crate::config::engine_config::EngineConfig;
use crate::domain::task::{
    ArtifactRef, ImportExportTask, TaskPage, TaskRequest, TaskSnapshot,
};
use crate::domain::types::{TaskKind, TaskStatus};
use crate::engine::error::{TaskError, TaskResult};
use crate::engine::{export_runner, import_runner};
use crate::importer::dq_validator::ValidationPipeline;
use crate::importer::error_report::ErrorReportBuilder;
use crate::importer::file_parser::SpreadsheetCodec;
use crate::importer::importer_trait::{ExportSource, RowPersister};
use crate::importer::validator_registry::{DataTypeDefinition, ValidatorRegistry};
use crate::repository::artifact_store::{ArtifactStore, ReadSeek};
use crate::repository::task_repo::TaskStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// 任务执行结果（正常结束）
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Completed,
    Cancelled,
}

/// 下载制品类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Result,      // 导出结果
    ErrorReport, // 导入错误报告
}

// ==========================================
// TaskControl - 执行中任务的共享状态
// ==========================================
pub(crate) struct TaskControl {
    task: Mutex<ImportExportTask>,
    cancel_requested: AtomicBool,
    running: AtomicBool,
    queued: AtomicBool,
}

impl TaskControl {
    fn new(task: ImportExportTask) -> Self {
        Self {
            task: Mutex::new(task),
            cancel_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            queued: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> TaskResult<MutexGuard<'_, ImportExportTask>> {
        self.task
            .lock()
            .map_err(|e| TaskError::LockError(e.to_string()))
    }

    /// 在锁内修改任务并返回修改后的副本
    pub(crate) fn update<F>(&self, f: F) -> TaskResult<ImportExportTask>
    where
        F: FnOnce(&mut ImportExportTask),
    {
        let mut task = self.lock()?;
        f(&mut task);
        Ok(task.clone())
    }

    pub(crate) fn snapshot(&self) -> TaskResult<TaskSnapshot> {
        Ok(self.lock()?.snapshot())
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

/// 批次进度（计数为本任务累计值）
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BatchProgress {
    pub processed: u64,
    pub success: u64,
    pub failure: u64,
}

// ==========================================
// EngineInner - 引擎共享依赖
// ==========================================
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) task_store: Arc<dyn TaskStore>,
    pub(crate) artifact_store: Arc<dyn ArtifactStore>,
    pub(crate) pipeline: ValidationPipeline,
    pub(crate) codec: SpreadsheetCodec,
    pub(crate) report_builder: ErrorReportBuilder,
    pub(crate) persister: Arc<dyn RowPersister>,
    pub(crate) export_source: Arc<dyn ExportSource>,
    controls: Mutex<HashMap<String, Arc<TaskControl>>>,
    workers: Arc<Semaphore>,
}

impl EngineInner {
    fn controls(&self) -> TaskResult<MutexGuard<'_, HashMap<String, Arc<TaskControl>>>> {
        self.controls
            .lock()
            .map_err(|e| TaskError::LockError(e.to_string()))
    }

    fn live_control(&self, task_id: &str) -> TaskResult<Option<Arc<TaskControl>>> {
        Ok(self.controls()?.get(task_id).cloned())
    }

    fn release_control(&self, task_id: &str) -> TaskResult<()> {
        self.controls()?.remove(task_id);
        Ok(())
    }

    pub(crate) fn definition(&self, data_type: &str) -> TaskResult<Arc<DataTypeDefinition>> {
        self.pipeline
            .registry()
            .get(data_type)
            .ok_or_else(|| TaskError::UnknownDataType(data_type.to_string()))
    }

    /// 记录批次进度（单调不减，执行期间最高 99）
    ///
    /// 进度落库失败只记录告警，不影响任务执行
    pub(crate) fn record_progress(
        &self,
        control: &TaskControl,
        progress: BatchProgress,
        expected_total: Option<u64>,
    ) -> TaskResult<()> {
        let task = control.update(|task| {
            task.total_count = progress.processed;
            task.success_count = progress.success;
            task.failure_count = progress.failure;
            if let Some(expected) = expected_total.filter(|n| *n > 0) {
                let percent = (progress.processed.saturating_mul(100) / expected).min(99) as u8;
                task.progress_percent = task.progress_percent.max(percent);
            }
        })?;

        if let Err(e) = self.task_store.update_task(&task) {
            warn!(task_id = %task.task_id, error = %e, "进度落库失败");
        }
        Ok(())
    }

    /// 执行任务（阻塞，直到任务进入终态）
    #[instrument(skip(self))]
    pub(crate) fn execute(&self, task_id: &str) -> TaskResult<TaskSnapshot> {
        let control = self.acquire_control(task_id)?;

        if control.running.swap(true, Ordering::SeqCst) {
            return Err(TaskError::TaskAlreadyRunning(task_id.to_string()));
        }

        let result = self.run_to_completion(task_id, &control);
        control.running.store(false, Ordering::SeqCst);
        result
    }

    /// 取得任务的执行控制块（不在内存中时从存储恢复 PENDING 任务）
    fn acquire_control(&self, task_id: &str) -> TaskResult<Arc<TaskControl>> {
        if let Some(control) = self.live_control(task_id)? {
            return Ok(control);
        }

        let task = self
            .task_store
            .get_task(task_id)?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        match task.status {
            TaskStatus::Pending => {
                let mut controls = self.controls()?;
                let control = controls
                    .entry(task_id.to_string())
                    .or_insert_with(|| Arc::new(TaskControl::new(task)));
                Ok(Arc::clone(control))
            }
            TaskStatus::Running => Err(TaskError::TaskAlreadyRunning(task_id.to_string())),
            status => Err(TaskError::InvalidStateTransition {
                from: status.to_string(),
                to: TaskStatus::Running.to_string(),
            }),
        }
    }

    /// 调度前检查：只接受尚未排队的 PENDING 任务
    ///
    /// # 错误
    /// - TaskAlreadyRunning: 任务正在执行或已在队列中
    /// - InvalidStateTransition: 任务已处于终态
    fn claim_for_schedule(&self, task_id: &str) -> TaskResult<()> {
        let control = self.acquire_control(task_id)?;
        let status = control.lock()?.status;

        if control.running.load(Ordering::SeqCst) || status == TaskStatus::Running {
            return Err(TaskError::TaskAlreadyRunning(task_id.to_string()));
        }
        if status != TaskStatus::Pending {
            return Err(TaskError::InvalidStateTransition {
                from: status.to_string(),
                to: TaskStatus::Running.to_string(),
            });
        }
        if control.queued.swap(true, Ordering::SeqCst) {
            return Err(TaskError::TaskAlreadyRunning(task_id.to_string()));
        }
        Ok(())
    }

    fn run_to_completion(&self, task_id: &str, control: &TaskControl) -> TaskResult<TaskSnapshot> {
        // PENDING → RUNNING
        let mut rejected = None;
        let task = control.update(|task| {
            if task.status == TaskStatus::Running {
                rejected = Some(TaskError::TaskAlreadyRunning(task.task_id.clone()));
            } else if !task.status.can_transition_to(TaskStatus::Running) {
                rejected = Some(TaskError::InvalidStateTransition {
                    from: task.status.to_string(),
                    to: TaskStatus::Running.to_string(),
                });
            } else {
                task.status = TaskStatus::Running;
                task.started_at = Some(Utc::now());
            }
        })?;
        if let Some(err) = rejected {
            return Err(err);
        }
        self.task_store.update_task(&task)?;

        info!(
            task_id,
            kind = %task.task_kind,
            data_type = %task.data_type,
            format = %task.file_format,
            "任务开始执行"
        );

        let outcome = match task.task_kind {
            TaskKind::Import => import_runner::run(self, control, &task),
            TaskKind::Export => export_runner::run(self, control, &task),
        };

        // 取消请求与终态在同一把锁内判定：cancel 返回 true 的任务必以 CANCELLED 结束
        let mut discarded = Vec::new();
        let finished = control.update(|task| {
            task.finished_at = Some(Utc::now());
            match &outcome {
                Ok(RunOutcome::Completed) if !control.is_cancel_requested() => {
                    task.status = TaskStatus::Succeeded;
                    task.progress_percent = 100;
                }
                Ok(_) => {
                    task.status = TaskStatus::Cancelled;
                    discarded.extend(task.result_artifact.take());
                    discarded.extend(task.error_report.take());
                }
                Err(e) => {
                    task.status = TaskStatus::Failed;
                    task.error_message = Some(e.public_message(self.config.error_message_max_len));
                }
            }
        })?;

        for artifact in &discarded {
            if let Err(e) = self.artifact_store.delete(artifact) {
                warn!(task_id, artifact = %artifact, error = %e, "已取消任务的制品删除失败");
            }
        }

        let persisted = self.task_store.update_task(&finished);
        self.release_control(task_id)?;

        match (&outcome, finished.status) {
            (Err(e), _) => error!(task_id, error = %e, "任务执行失败"),
            (_, TaskStatus::Cancelled) => info!(
                task_id,
                processed = finished.total_count,
                "任务已取消"
            ),
            _ => info!(
                task_id,
                total = finished.total_count,
                success = finished.success_count,
                failure = finished.failure_count,
                "任务执行成功"
            ),
        }

        persisted?;
        Ok(finished.snapshot())
    }
}

// ==========================================
// EngineDeps - 引擎构造参数
// ==========================================
pub struct EngineDeps {
    pub config: EngineConfig,
    pub task_store: Arc<dyn TaskStore>,
    pub artifact_store: Arc<dyn ArtifactStore>,
    pub registry: Arc<ValidatorRegistry>,
    pub persister: Arc<dyn RowPersister>,
    pub export_source: Arc<dyn ExportSource>,
}

// ==========================================
// TaskEngine - 任务引擎
// ==========================================
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
}

impl TaskEngine {
    /// 创建任务引擎
    ///
    /// # 错误
    /// - InvalidRequest: 配置不合法（批大小 / 并发数为 0 等）
    pub fn new(deps: EngineDeps) -> TaskResult<Self> {
        deps.config.validate().map_err(TaskError::InvalidRequest)?;

        let codec = SpreadsheetCodec::new(deps.config.max_import_rows);
        let report_builder =
            ErrorReportBuilder::new(codec.clone(), Arc::clone(&deps.artifact_store));
        let workers = Arc::new(Semaphore::new(deps.config.worker_threads));

        Ok(Self {
            inner: Arc::new(EngineInner {
                pipeline: ValidationPipeline::new(deps.registry),
                codec,
                report_builder,
                config: deps.config,
                task_store: deps.task_store,
                artifact_store: deps.artifact_store,
                persister: deps.persister,
                export_source: deps.export_source,
                controls: Mutex::new(HashMap::new()),
                workers,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn artifact_store(&self) -> Arc<dyn ArtifactStore> {
        Arc::clone(&self.inner.artifact_store)
    }

    /// 检查请求的归属人、数据类型与格式（不检查源文件）
    ///
    /// # 错误
    /// - UnknownDataType: 数据类型未注册
    /// - UnsupportedFormat: 导出请求使用不可写格式（.xls）
    /// - InvalidRequest: 归属人为空
    pub fn validate_request(&self, request: &TaskRequest) -> TaskResult<()> {
        if request.owner.trim().is_empty() {
            return Err(TaskError::InvalidRequest("owner 不能为空".to_string()));
        }
        self.inner.definition(&request.data_type)?;

        if request.task_kind == TaskKind::Export && !request.file_format.is_writable() {
            return Err(TaskError::UnsupportedFormat(format!(
                "{}（仅可读取）",
                request.file_format
            )));
        }
        Ok(())
    }

    /// 创建 PENDING 任务（不调度）
    ///
    /// # 错误
    /// - UnknownDataType: 数据类型未注册
    /// - UnsupportedFormat: 导出请求使用不可写格式（.xls）
    /// - InvalidRequest: 导入请求缺少源文件 / 必填字段为空
    pub fn create_task(&self, request: TaskRequest) -> TaskResult<String> {
        self.validate_request(&request)?;
        if request.task_kind == TaskKind::Import && request.source_artifact.is_none() {
            return Err(TaskError::InvalidRequest("导入任务缺少源文件".to_string()));
        }

        let task = ImportExportTask::from_request(request);
        self.inner.task_store.create_task(&task)?;

        let task_id = task.task_id.clone();
        debug!(task_id = %task_id, kind = %task.task_kind, "任务已创建");
        self.inner
            .controls()?
            .insert(task_id.clone(), Arc::new(TaskControl::new(task)));
        Ok(task_id)
    }

    /// 调度任务到工作池（立即返回）
    ///
    /// # 错误
    /// - Scheduling: 当前线程不在 tokio 运行时内
    /// - TaskAlreadyRunning: 任务正在执行或已在队列中
    /// - InvalidStateTransition: 任务已处于终态
    pub fn schedule(&self, task_id: &str) -> TaskResult<()> {
        let handle = Handle::try_current().map_err(|e| TaskError::Scheduling(e.to_string()))?;
        self.inner.claim_for_schedule(task_id)?;
        let inner = Arc::clone(&self.inner);
        let task_id = task_id.to_string();

        handle.spawn(async move {
            let permit = match Arc::clone(&inner.workers).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "工作池已关闭");
                    return;
                }
            };

            let worker = Arc::clone(&inner);
            let id = task_id.clone();
            let joined = tokio::task::spawn_blocking(move || worker.execute(&id)).await;
            drop(permit);

            match joined {
                Ok(Ok(snapshot)) => {
                    debug!(task_id = %task_id, status = %snapshot.status, "工作线程结束")
                }
                // 排队期间被取消的任务
                Ok(Err(TaskError::InvalidStateTransition { from, .. }))
                    if from == TaskStatus::Cancelled.as_str() =>
                {
                    debug!(task_id = %task_id, "任务已在排队期间取消")
                }
                Ok(Err(e)) => warn!(task_id = %task_id, error = %e, "任务未能执行"),
                Err(e) => error!(task_id = %task_id, error = %e, "工作线程异常退出"),
            }
        });
        Ok(())
    }

    /// 提交任务 = 创建 + 调度
    pub fn submit(&self, request: TaskRequest) -> TaskResult<String> {
        let task_id = self.create_task(request)?;
        self.schedule(&task_id)?;
        Ok(task_id)
    }

    /// 同步执行任务（阻塞到终态，供工作线程与测试调用）
    ///
    /// # 错误
    /// - TaskAlreadyRunning: 任务正在执行
    /// - InvalidStateTransition: 任务已处于终态
    pub fn execute(&self, task_id: &str) -> TaskResult<TaskSnapshot> {
        self.inner.execute(task_id)
    }

    /// 请求取消任务
    ///
    /// # 返回
    /// - true: 已取消（PENDING）或已登记取消请求（RUNNING，任务随后以 CANCELLED 结束）
    /// - false: 任务已处于终态
    pub fn cancel(&self, task_id: &str) -> TaskResult<bool> {
        if let Some(control) = self.inner.live_control(task_id)? {
            let mut cancelled_pending = None;
            let mut accepted = false;
            control.update(|task| match task.status {
                TaskStatus::Pending => {
                    task.status = TaskStatus::Cancelled;
                    task.finished_at = Some(Utc::now());
                    cancelled_pending = Some(task.clone());
                    accepted = true;
                }
                TaskStatus::Running => {
                    control.cancel_requested.store(true, Ordering::SeqCst);
                    accepted = true;
                }
                _ => {}
            })?;

            if let Some(task) = cancelled_pending {
                self.inner.task_store.update_task(&task)?;
                self.inner.release_control(task_id)?;
                info!(task_id, "任务在执行前取消");
            } else if accepted {
                info!(task_id, "已登记取消请求");
            }
            return Ok(accepted);
        }

        let Some(mut task) = self.inner.task_store.get_task(task_id)? else {
            return Err(TaskError::NotFound(task_id.to_string()));
        };
        if task.status.is_terminal() {
            return Ok(false);
        }

        // 没有执行体持有的非终态任务（如进程重启前遗留）直接取消
        task.status = TaskStatus::Cancelled;
        task.finished_at = Some(Utc::now());
        self.inner.task_store.update_task(&task)?;
        info!(task_id, "遗留任务已取消");
        Ok(true)
    }

    /// 查询任务进度（不等待执行体）
    pub fn query_progress(&self, task_id: &str) -> TaskResult<TaskSnapshot> {
        if let Some(control) = self.inner.live_control(task_id)? {
            return control.snapshot();
        }
        self.inner
            .task_store
            .get_task(task_id)?
            .map(|task| task.snapshot())
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    /// 按归属人分页查询任务
    pub fn list_tasks(&self, owner: &str, page_num: u32, page_size: u32) -> TaskResult<TaskPage> {
        Ok(self
            .inner
            .task_store
            .list_tasks_by_owner(owner, page_num.max(1), page_size.max(1))?)
    }

    /// 打开任务制品用于下载（下载计数 +1）
    ///
    /// # 错误
    /// - NotFound: 任务不存在或没有该类制品
    pub fn open_artifact(
        &self,
        task_id: &str,
        kind: ArtifactKind,
    ) -> TaskResult<(ArtifactRef, Box<dyn ReadSeek + Send>)> {
        let mut task = self
            .inner
            .task_store
            .get_task(task_id)?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        let artifact = match kind {
            ArtifactKind::Result => task.result_artifact.clone(),
            ArtifactKind::ErrorReport => task.error_report.clone(),
        }
        .ok_or_else(|| TaskError::NotFound(format!("{} 的制品", task_id)))?;

        let reader = self.inner.artifact_store.open(&artifact)?;

        task.download_count = task.download_count.saturating_add(1);
        self.inner.task_store.update_task(&task)?;
        debug!(task_id, artifact = %artifact, downloads = task.download_count, "制品已打开");

        Ok((artifact, reader))
    }
}
