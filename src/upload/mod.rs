// ==========================================
// 批量导入导出引擎 - 分片上传层
// ==========================================
// 职责: 分片接收 → 完整性校验 → 拼接 → 转存为制品
// ==========================================

pub mod chunk_assembler;
pub mod error;

pub use chunk_assembler::{sha256_hex, ChunkAssembler};
pub use error::{UploadError, UploadResult};
