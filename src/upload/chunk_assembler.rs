// ==========================================
// 批量导入导出引擎 - 分片拼接器
// ==========================================
// 职责: 按分片号接收分片、校验完整性、拼接为单一文件
// 存储: <upload_dir>/<session_id>/<n>.part，拼接结果为 assembled.bin
// 并发: 不同分片号可并发写入；同一分片重复投递幂等
// ==========================================

use crate::config::EngineConfig;
use crate::domain::task::ArtifactRef;
use crate::domain::upload::{AssembledFile, SessionStatus, UploadSession};
use crate::repository::artifact_store::ArtifactStore;
use crate::upload::error::{UploadError, UploadResult};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const ASSEMBLED_FILE_NAME: &str = "assembled.bin";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// 计算 SHA-256（hex，小写）
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn normalize_hash(hash: &str) -> String {
    hash.trim().to_ascii_lowercase()
}

// ==========================================
// ChunkAssembler - 分片拼接器
// ==========================================
pub struct ChunkAssembler {
    upload_dir: PathBuf,
    max_upload_size_bytes: u64,
    session_ttl_secs: u64,
    sessions: Mutex<HashMap<String, UploadSession>>,
}

impl ChunkAssembler {
    /// 创建分片拼接器
    ///
    /// # 参数
    /// - upload_dir: 分片暂存根目录
    /// - max_upload_size_bytes: 单文件大小上限
    /// - session_ttl_secs: 会话保留时长，超时后由 purge_expired 清理
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        max_upload_size_bytes: u64,
        session_ttl_secs: u64,
    ) -> UploadResult<Self> {
        let upload_dir = upload_dir.into();
        fs::create_dir_all(&upload_dir)?;
        Ok(Self {
            upload_dir,
            max_upload_size_bytes,
            session_ttl_secs,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &EngineConfig) -> UploadResult<Self> {
        Self::new(
            config.upload_dir(),
            config.max_upload_size_bytes,
            config.upload_session_ttl_secs,
        )
    }

    fn lock_sessions(&self) -> UploadResult<MutexGuard<'_, HashMap<String, UploadSession>>> {
        self.sessions
            .lock()
            .map_err(|e| UploadError::LockError(e.to_string()))
    }

    /// 初始化上传会话
    ///
    /// # 参数
    /// - file_name: 原始文件名
    /// - total_size: 声明的文件总大小（字节）
    /// - total_chunks: 声明的分片数（>= 1）
    /// - declared_hash: 声明的整文件 SHA-256（可选）
    #[instrument(skip(self, declared_hash))]
    pub fn init_upload(
        &self,
        file_name: &str,
        total_size: u64,
        total_chunks: u32,
        declared_hash: Option<&str>,
    ) -> UploadResult<UploadSession> {
        if file_name.trim().is_empty() {
            return Err(UploadError::InvalidRequest("文件名不能为空".to_string()));
        }
        if total_chunks == 0 {
            return Err(UploadError::InvalidRequest("分片数必须大于 0".to_string()));
        }
        if total_size > self.max_upload_size_bytes {
            return Err(UploadError::FileTooLarge {
                size: total_size,
                limit: self.max_upload_size_bytes,
            });
        }

        let session_id = Uuid::new_v4().to_string();
        let storage_dir = self.upload_dir.join(&session_id);
        fs::create_dir_all(&storage_dir)?;

        let session = UploadSession {
            session_id: session_id.clone(),
            file_name: file_name.trim().to_string(),
            total_size,
            total_chunks,
            declared_hash: declared_hash
                .map(normalize_hash)
                .filter(|h| !h.is_empty()),
            received_chunks: BTreeSet::new(),
            storage_dir,
            assembled: None,
            created_at: Utc::now(),
        };

        self.lock_sessions()?
            .insert(session_id.clone(), session.clone());

        info!(session_id = %session_id, total_size, total_chunks, "上传会话已创建");
        Ok(session)
    }

    /// 接收一个分片
    ///
    /// 重复投递已接收的分片号直接返回当前进度（不覆盖已落盘数据）
    pub fn put_chunk(
        &self,
        session_id: &str,
        chunk_number: u32,
        bytes: &[u8],
        chunk_hash: Option<&str>,
    ) -> UploadResult<SessionStatus> {
        let storage_dir = {
            let sessions = self.lock_sessions()?;
            let session = sessions
                .get(session_id)
                .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;

            if chunk_number == 0 || chunk_number > session.total_chunks {
                return Err(UploadError::ChunkOutOfRange {
                    chunk_number,
                    total_chunks: session.total_chunks,
                });
            }
            if session.received_chunks.contains(&chunk_number) {
                debug!(session_id, chunk_number, "重复分片，忽略");
                return Ok(session.status());
            }
            session.storage_dir.clone()
        };

        if let Some(expected) = chunk_hash {
            let actual = sha256_hex(bytes);
            if normalize_hash(expected) != actual {
                warn!(session_id, chunk_number, "分片哈希不匹配");
                return Err(UploadError::Integrity(format!(
                    "分片 {} 哈希不匹配",
                    chunk_number
                )));
            }
        }

        // 先写临时文件，再原子重命名为 <n>.part
        let mut temp = NamedTempFile::new_in(&storage_dir)?;
        temp.write_all(bytes)?;
        temp.flush()?;
        temp.persist(chunk_path(&storage_dir, chunk_number))?;

        let mut sessions = self.lock_sessions()?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;
        session.received_chunks.insert(chunk_number);

        debug!(
            session_id,
            chunk_number,
            received = session.received_chunks.len(),
            total = session.total_chunks,
            "分片已接收"
        );
        Ok(session.status())
    }

    /// 查询会话进度（含缺失分片，供断点续传）
    pub fn session_status(&self, session_id: &str) -> UploadResult<(SessionStatus, Vec<u32>)> {
        let sessions = self.lock_sessions()?;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;
        Ok((session.status(), session.missing_chunks()))
    }

    /// 拼接全部分片
    ///
    /// # 返回
    /// - AssembledFile: 拼接结果（重复调用返回同一结果）
    ///
    /// # 错误
    /// - IncompleteUpload: 存在缺失分片
    /// - Integrity: 大小或整文件哈希不符（会话及其文件被删除）
    #[instrument(skip(self))]
    pub fn finalize(&self, session_id: &str) -> UploadResult<AssembledFile> {
        let (storage_dir, total_chunks, total_size, declared_hash) = {
            let sessions = self.lock_sessions()?;
            let session = sessions
                .get(session_id)
                .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;

            if let Some(assembled) = &session.assembled {
                return Ok(assembled.clone());
            }

            let missing = session.missing_chunks();
            if !missing.is_empty() {
                return Err(UploadError::IncompleteUpload { missing });
            }

            (
                session.storage_dir.clone(),
                session.total_chunks,
                session.total_size,
                session.declared_hash.clone(),
            )
        };

        let (temp, size, hash) = concat_chunks(&storage_dir, total_chunks)?;

        let integrity_failure = if size != total_size {
            Some(format!("文件大小不符: 声明 {} 字节，实际 {} 字节", total_size, size))
        } else {
            match &declared_hash {
                Some(expected) if *expected != hash => Some("整文件哈希不匹配".to_string()),
                _ => None,
            }
        };

        if let Some(reason) = integrity_failure {
            // temp 随 drop 删除；会话已不可恢复，一并清理
            drop(temp);
            self.discard(session_id)?;
            warn!(session_id, reason = %reason, "拼接完整性校验失败");
            return Err(UploadError::Integrity(reason));
        }

        let path = storage_dir.join(ASSEMBLED_FILE_NAME);
        temp.persist(&path)?;

        let assembled = AssembledFile { path, size, hash };

        let mut sessions = self.lock_sessions()?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;
        if let Some(existing) = &session.assembled {
            return Ok(existing.clone());
        }
        session.assembled = Some(assembled.clone());

        info!(session_id, size = assembled.size, "分片拼接完成");
        Ok(assembled)
    }

    /// 认领已拼接文件：转存到制品存储并销毁会话
    #[instrument(skip(self, store))]
    pub fn claim(&self, session_id: &str, store: &dyn ArtifactStore) -> UploadResult<ArtifactRef> {
        let session = {
            let mut sessions = self.lock_sessions()?;
            let finalized = sessions
                .get(session_id)
                .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?
                .assembled
                .is_some();
            if !finalized {
                return Err(UploadError::NotFinalized(session_id.to_string()));
            }
            sessions
                .remove(session_id)
                .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?
        };

        let saved = session
            .assembled
            .as_ref()
            .ok_or_else(|| UploadError::NotFinalized(session_id.to_string()))
            .and_then(|assembled| {
                let mut file = File::open(&assembled.path)?;
                Ok(store.save_stream(&session.file_name, &mut file)?)
            });

        match saved {
            Ok(artifact) => {
                remove_dir_quietly(&session.storage_dir);
                info!(session_id, artifact = %artifact, "上传文件已认领");
                Ok(artifact)
            }
            Err(e) => {
                // 转存失败时恢复会话，允许重试
                self.lock_sessions()?
                    .insert(session_id.to_string(), session);
                Err(e)
            }
        }
    }

    /// 放弃上传会话并删除其文件
    pub fn discard(&self, session_id: &str) -> UploadResult<()> {
        let removed = self.lock_sessions()?.remove(session_id);
        match removed {
            Some(session) => {
                remove_dir_quietly(&session.storage_dir);
                Ok(())
            }
            None => Err(UploadError::SessionNotFound(session_id.to_string())),
        }
    }

    /// 清理过期会话
    ///
    /// # 返回
    /// - 被清理的会话数
    pub fn purge_expired(&self, now: DateTime<Utc>) -> UploadResult<usize> {
        let ttl = Duration::seconds(i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX));

        let expired: Vec<UploadSession> = {
            let mut sessions = self.lock_sessions()?;
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.created_at + ttl <= now)
                .map(|s| s.session_id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            remove_dir_quietly(&session.storage_dir);
        }

        if !expired.is_empty() {
            info!(purged = expired.len(), "过期上传会话已清理");
        }
        Ok(expired.len())
    }

    /// 当前会话数
    pub fn session_count(&self) -> UploadResult<usize> {
        Ok(self.lock_sessions()?.len())
    }
}

fn chunk_path(storage_dir: &Path, chunk_number: u32) -> PathBuf {
    storage_dir.join(format!("{}.part", chunk_number))
}

/// 按分片号升序拼接到临时文件，同时计算大小与哈希
fn concat_chunks(
    storage_dir: &Path,
    total_chunks: u32,
) -> UploadResult<(NamedTempFile, u64, String)> {
    let temp = NamedTempFile::new_in(storage_dir)?;
    let mut hasher = Sha256::new();
    let mut size: u64 = 0;
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

    {
        let mut writer = BufWriter::new(temp.as_file());
        for chunk_number in 1..=total_chunks {
            let mut part = File::open(chunk_path(storage_dir, chunk_number))?;
            loop {
                let n = part.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
                writer.write_all(&buffer[..n])?;
                size += n as u64;
            }
        }
        writer.flush()?;
    }

    Ok((temp, size, format!("{:x}", hasher.finalize())))
}

fn remove_dir_quietly(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), error = %e, "上传目录清理失败");
        }
    }
}
