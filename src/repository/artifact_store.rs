// ==========================================
// 批量导入导出引擎 - 制品存储
// ==========================================
// 职责: 上传文件 / 导出结果 / 错误报告的持久化与读取
// 引用格式: <uuid>/<文件名>，对调用方不透明
// ==========================================

use crate::domain::task::ArtifactRef;
use crate::repository::error::{RepositoryError, RepositoryResult};
use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

/// 可读可定位（xlsx 解码需要 Seek）
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

// ==========================================
// ArtifactStore Trait
// ==========================================
// 实现者: LocalArtifactStore（本地文件系统）
pub trait ArtifactStore: Send + Sync {
    /// 保存字节内容
    fn save(&self, name: &str, bytes: &[u8]) -> RepositoryResult<ArtifactRef>;

    /// 以流方式保存（大文件不整体载入内存）
    fn save_stream(&self, name: &str, reader: &mut dyn Read) -> RepositoryResult<ArtifactRef>;

    /// 打开制品读取
    ///
    /// # 错误
    /// - NotFound: 制品不存在
    fn open(&self, artifact: &ArtifactRef) -> RepositoryResult<Box<dyn ReadSeek + Send>>;

    /// 删除制品（不存在视为成功）
    fn delete(&self, artifact: &ArtifactRef) -> RepositoryResult<()>;
}

// ==========================================
// LocalArtifactStore - 本地文件系统实现
// ==========================================
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 制品引用 → 本地路径（拒绝绝对路径与 .. ）
    pub fn path_of(&self, artifact: &ArtifactRef) -> RepositoryResult<PathBuf> {
        let relative = Path::new(artifact.as_str());
        let safe = !artifact.as_str().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(RepositoryError::InvalidArtifactRef(artifact.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn write_with<F>(&self, name: &str, write: F) -> RepositoryResult<ArtifactRef>
    where
        F: FnOnce(&mut NamedTempFile) -> io::Result<u64>,
    {
        let artifact = ArtifactRef::new(format!("{}/{}", Uuid::new_v4(), sanitize_name(name)));
        let target = self.path_of(&artifact)?;
        let dir = target
            .parent()
            .ok_or_else(|| RepositoryError::InvalidArtifactRef(artifact.to_string()))?;
        fs::create_dir_all(dir)?;

        // 先写临时文件，写完后原子重命名
        let mut temp = NamedTempFile::new_in(dir)?;
        let written = write(&mut temp)?;
        temp.flush()?;
        temp.persist(&target)?;

        debug!(artifact = %artifact, bytes = written, "制品已保存");
        Ok(artifact)
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn save(&self, name: &str, bytes: &[u8]) -> RepositoryResult<ArtifactRef> {
        self.write_with(name, |file| {
            file.write_all(bytes)?;
            Ok(bytes.len() as u64)
        })
    }

    fn save_stream(&self, name: &str, reader: &mut dyn Read) -> RepositoryResult<ArtifactRef> {
        self.write_with(name, |file| io::copy(reader, file))
    }

    fn open(&self, artifact: &ArtifactRef) -> RepositoryResult<Box<dyn ReadSeek + Send>> {
        let path = self.path_of(artifact)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RepositoryError::NotFound {
                entity: "Artifact".to_string(),
                id: artifact.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, artifact: &ArtifactRef) -> RepositoryResult<()> {
        let path = self.path_of(artifact)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        // 目录为空时一并清理
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir(dir);
        }
        Ok(())
    }
}

/// 文件名只保留最后一段，去掉路径分隔符
fn sanitize_name(name: &str) -> String {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        "artifact.bin".to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_open_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path()).unwrap();

        let artifact = store.save("report.csv", b"a,b\n1,2\n").unwrap();
        assert!(artifact.as_str().ends_with("/report.csv"));

        let mut content = String::new();
        store.open(&artifact).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "a,b\n1,2\n");

        store.delete(&artifact).unwrap();
        assert!(matches!(
            store.open(&artifact),
            Err(RepositoryError::NotFound { .. })
        ));
        // 重复删除不报错
        store.delete(&artifact).unwrap();
    }

    #[test]
    fn test_save_stream() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path()).unwrap();

        let mut source: &[u8] = b"streamed bytes";
        let artifact = store.save_stream("../../etc/x.bin", &mut source).unwrap();

        assert!(artifact.as_str().ends_with("/x.bin"));
        assert_eq!(fs::read(store.path_of(&artifact).unwrap()).unwrap(), b"streamed bytes");
    }

    #[test]
    fn test_rejects_escaping_refs() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path()).unwrap();

        assert!(matches!(
            store.open(&ArtifactRef::new("../secret")),
            Err(RepositoryError::InvalidArtifactRef(_))
        ));
        assert!(matches!(
            store.open(&ArtifactRef::new("/etc/passwd")),
            Err(RepositoryError::InvalidArtifactRef(_))
        ));
    }
}
