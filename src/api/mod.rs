// ==========================================
// 批量导入导出引擎 - API 层
// ==========================================
// 职责: 面向调用方的异步接口（HTTP / 命令层在本库之外）
// ==========================================

pub mod error;
pub mod transfer_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use transfer_api::{
    FinalizeUploadResponse, InitUploadRequest, InitUploadResponse, SubmitExportRequest,
    SubmitImportRequest, TransferApi,
};
