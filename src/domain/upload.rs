// ==========================================
// 批量导入导出引擎 - 分片上传领域模型
// ==========================================
// 生命周期: 初始化上传时创建 → 每个分片到达时更新 →
//           被任务认领或过期后销毁
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

// ==========================================
// UploadSession - 上传会话
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: String,
    pub file_name: String,
    pub total_size: u64,                     // 声明的文件总大小（字节）
    pub total_chunks: u32,                   // 声明的分片数
    pub declared_hash: Option<String>,       // 声明的整文件 SHA-256（hex）
    pub received_chunks: BTreeSet<u32>,      // 已接收分片号（1 起）
    pub storage_dir: PathBuf,                // 分片暂存目录
    pub assembled: Option<AssembledFile>,    // 拼接结果（finalize 之后）
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    /// 1..=total_chunks 全部到齐
    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() as u32 == self.total_chunks
            && (1..=self.total_chunks).all(|n| self.received_chunks.contains(&n))
    }

    /// 缺失的分片号（升序）
    pub fn missing_chunks(&self) -> Vec<u32> {
        (1..=self.total_chunks)
            .filter(|n| !self.received_chunks.contains(n))
            .collect()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id.clone(),
            received_count: self.received_chunks.len() as u32,
            total_chunks: self.total_chunks,
            complete: self.is_complete(),
        }
    }
}

// ==========================================
// SessionStatus - 会话进度
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub received_count: u32,
    pub total_chunks: u32,
    pub complete: bool,
}

// ==========================================
// AssembledFile - 拼接完成的文件
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledFile {
    pub path: PathBuf,
    pub size: u64,
    pub hash: String, // SHA-256（hex，小写）
}
