// ==========================================
// 批量导入导出引擎 - 导入导出API
// ==========================================
// 职责: 封装分片上传、任务提交、进度查询与制品下载
// 说明: 文件 I/O 部分通过 spawn_blocking 执行，不阻塞异步运行时
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::task::{ArtifactRef, TaskPage, TaskRequest, TaskSnapshot};
use crate::domain::types::{FileFormat, TaskKind};
use crate::domain::upload::SessionStatus;
use crate::engine::task_engine::{ArtifactKind, TaskEngine};
use crate::repository::artifact_store::ReadSeek;
use crate::upload::chunk_assembler::ChunkAssembler;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// 上传初始化请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitUploadRequest {
    pub file_name: String,
    pub total_size: u64,
    pub total_chunks: u32,
    /// 整文件 SHA-256（hex，可选）
    pub file_hash: Option<String>,
}

/// 上传初始化响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitUploadResponse {
    pub session_id: String,
    pub total_chunks: u32,
}

/// 上传完成响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeUploadResponse {
    pub session_id: String,
    pub size: u64,
    pub hash: String,
}

/// 导入提交请求（源文件为已完成的上传会话）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitImportRequest {
    pub session_id: String,
    pub task_name: String,
    pub owner: String,
    pub data_type: String,
    pub file_format: FileFormat,
    pub declared_total: Option<u64>,
    pub remark: Option<String>,
}

/// 导出提交请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitExportRequest {
    pub task_name: String,
    pub owner: String,
    pub data_type: String,
    pub file_format: FileFormat,
    #[serde(default)]
    pub query_params: serde_json::Value,
    pub remark: Option<String>,
}

async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::InternalError(format!("后台任务异常: {}", e)))?
}

// ==========================================
// TransferApi - 导入导出API
// ==========================================
pub struct TransferApi {
    engine: TaskEngine,
    assembler: Arc<ChunkAssembler>,
}

impl TransferApi {
    pub fn new(engine: TaskEngine, assembler: Arc<ChunkAssembler>) -> Self {
        Self { engine, assembler }
    }

    pub fn engine(&self) -> &TaskEngine {
        &self.engine
    }

    // ==========================================
    // 分片上传
    // ==========================================

    /// 初始化上传会话
    pub async fn init_upload(&self, request: InitUploadRequest) -> ApiResult<InitUploadResponse> {
        let assembler = Arc::clone(&self.assembler);
        run_blocking(move || {
            let session = assembler.init_upload(
                &request.file_name,
                request.total_size,
                request.total_chunks,
                request.file_hash.as_deref(),
            )?;
            Ok(InitUploadResponse {
                session_id: session.session_id,
                total_chunks: session.total_chunks,
            })
        })
        .await
    }

    /// 上传单个分片（分片号 1 起，可乱序、可重复）
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        chunk_number: u32,
        bytes: Vec<u8>,
        chunk_hash: Option<String>,
    ) -> ApiResult<SessionStatus> {
        let assembler = Arc::clone(&self.assembler);
        let session_id = session_id.to_string();
        run_blocking(move || {
            Ok(assembler.put_chunk(&session_id, chunk_number, &bytes, chunk_hash.as_deref())?)
        })
        .await
    }

    /// 查询上传进度与缺失分片
    pub fn upload_status(&self, session_id: &str) -> ApiResult<(SessionStatus, Vec<u32>)> {
        Ok(self.assembler.session_status(session_id)?)
    }

    /// 完成上传（拼接 + 完整性校验）
    pub async fn finalize_upload(&self, session_id: &str) -> ApiResult<FinalizeUploadResponse> {
        let assembler = Arc::clone(&self.assembler);
        let session_id = session_id.to_string();
        run_blocking(move || {
            let assembled = assembler.finalize(&session_id)?;
            Ok(FinalizeUploadResponse {
                session_id,
                size: assembled.size,
                hash: assembled.hash,
            })
        })
        .await
    }

    /// 清理过期上传会话
    pub async fn purge_expired_uploads(&self) -> ApiResult<usize> {
        let assembler = Arc::clone(&self.assembler);
        run_blocking(move || Ok(assembler.purge_expired(Utc::now())?)).await
    }

    // ==========================================
    // 任务提交
    // ==========================================

    /// 以已完成的上传会话提交导入任务
    ///
    /// 请求先校验，通过后才认领会话；校验失败时上传会话保留，可修正后重新提交
    ///
    /// # 返回
    /// - Ok(task_id): 任务已进入工作池排队
    pub async fn submit_import(&self, request: SubmitImportRequest) -> ApiResult<String> {
        let mut task_request = TaskRequest {
            task_name: request.task_name,
            owner: request.owner,
            task_kind: TaskKind::Import,
            data_type: request.data_type,
            file_format: request.file_format,
            source_artifact: None,
            query_params: serde_json::Value::Null,
            declared_total: request.declared_total,
            remark: request.remark,
        };
        self.engine.validate_request(&task_request)?;

        let assembler = Arc::clone(&self.assembler);
        let store = self.engine.artifact_store();
        let session_id = request.session_id.clone();
        let source = run_blocking(move || Ok(assembler.claim(&session_id, store.as_ref())?)).await?;
        task_request.source_artifact = Some(source.clone());

        let task_id = match self.engine.create_task(task_request) {
            Ok(task_id) => task_id,
            Err(e) => {
                self.discard_source(&source);
                return Err(e.into());
            }
        };

        if let Err(e) = self.engine.schedule(&task_id) {
            // 未能排队的任务取消后再删除源文件，避免留下指向已删除文件的 PENDING 任务
            if let Err(cancel) = self.engine.cancel(&task_id) {
                warn!(task_id = %task_id, error = %cancel, "未调度任务取消失败");
            }
            self.discard_source(&source);
            return Err(e.into());
        }

        info!(task_id = %task_id, session_id = %request.session_id, "导入任务已提交");
        Ok(task_id)
    }

    /// 删除不再有归属的源文件
    fn discard_source(&self, source: &ArtifactRef) {
        if let Err(e) = self.engine.artifact_store().delete(source) {
            warn!(artifact = %source, error = %e, "源文件清理失败");
        }
    }

    /// 提交导出任务
    pub fn submit_export(&self, request: SubmitExportRequest) -> ApiResult<String> {
        let mut task_request = TaskRequest::export(
            request.task_name,
            request.owner,
            request.data_type,
            request.file_format,
            request.query_params,
        );
        task_request.remark = request.remark;

        let task_id = self.engine.submit(task_request)?;
        info!(task_id = %task_id, "导出任务已提交");
        Ok(task_id)
    }

    // ==========================================
    // 任务查询与控制
    // ==========================================

    pub fn cancel_task(&self, task_id: &str) -> ApiResult<bool> {
        Ok(self.engine.cancel(task_id)?)
    }

    pub fn get_task_progress(&self, task_id: &str) -> ApiResult<TaskSnapshot> {
        Ok(self.engine.query_progress(task_id)?)
    }

    pub fn list_tasks(&self, owner: &str, page_num: u32, page_size: u32) -> ApiResult<TaskPage> {
        Ok(self.engine.list_tasks(owner, page_num, page_size)?)
    }

    /// 打开任务制品（导出结果或错误报告）
    pub async fn open_task_artifact(
        &self,
        task_id: &str,
        kind: ArtifactKind,
    ) -> ApiResult<(ArtifactRef, Box<dyn ReadSeek + Send>)> {
        let engine = self.engine.clone();
        let task_id = task_id.to_string();
        run_blocking(move || Ok(engine.open_artifact(&task_id, kind)?)).await
    }
}
