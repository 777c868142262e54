use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::ErrorKind;
use tracing::warn;

const MAX_ORIGINAL_NAME_BYTES: usize = 200;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将客户端提供的存储名解析为根目录下的路径。
    ///
    /// 只接受单个普通路径分量，拒绝隐藏文件与符号链接。
    pub async fn resolve_name(&self, name: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_stored_name(name) {
            return Err(StorageError::InvalidName);
        }
        let target = self.root.join(name);
        match fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.file_type().is_symlink() => Err(StorageError::InvalidName),
            Ok(_) => Ok(target),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(target),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// 枚举根目录下的普通文件，按名称排序。
    ///
    /// 单个条目 stat 失败（例如枚举后被并发删除）时跳过该条目并记录警告。
    pub async fn list_files(&self) -> Result<Vec<StoredFile>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let Some(metadata) = stat_entry(&entry.path()).await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            entries.push(StoredFile::from_metadata(name, &metadata));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn file_info(&self, name: &str) -> Result<StoredFile, StorageError> {
        let target = self.resolve_name(name).await?;
        let metadata = fs::metadata(&target).await?;
        if !metadata.is_file() {
            return Err(StorageError::NotAFile);
        }
        Ok(StoredFile::from_metadata(name.to_string(), &metadata))
    }

    pub async fn delete_file(&self, name: &str) -> Result<(), StorageError> {
        let target = self.resolve_name(name).await?;
        let metadata = fs::metadata(&target).await?;
        if !metadata.is_file() {
            return Err(StorageError::NotAFile);
        }
        fs::remove_file(target).await?;
        Ok(())
    }
}

/// 读取枚举到的条目元数据（不跟随符号链接），失败时记录警告并返回 `None`。
async fn stat_entry(path: &Path) -> Option<Metadata> {
    match fs::symlink_metadata(path).await {
        Ok(metadata) => Some(metadata),
        Err(err) => {
            warn!(path = ?path, error = %err, "skipping entry with unreadable metadata");
            None
        }
    }
}

/// 存储根目录下的一个普通文件。
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl StoredFile {
    fn from_metadata(name: String, metadata: &Metadata) -> Self {
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        let created = metadata.created().unwrap_or(modified);
        Self {
            name,
            size: metadata.len(),
            created: created.into(),
            modified: modified.into(),
        }
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidName,
    NotAFile,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

pub fn is_valid_stored_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

/// 清理客户端文件名：去掉路径部分、非法字符并限制长度。
pub fn sanitize_original_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut cleaned = sanitize_filename::sanitize(base.trim());
    if cleaned.len() > MAX_ORIGINAL_NAME_BYTES {
        let mut cut = MAX_ORIGINAL_NAME_BYTES;
        while !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        cleaned.truncate(cut);
    }
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

pub fn stored_name(millis: u128, original: &str) -> String {
    format!("{millis}-{original}")
}

/// 从存储名中去掉时间戳前缀，还原原始文件名。
pub fn original_name(stored: &str) -> &str {
    match stored.split_once('-') {
        Some((prefix, rest))
            if !prefix.is_empty() && !rest.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            rest
        }
        _ => stored,
    }
}

pub fn epoch_millis(now: SystemTime) -> u128 {
    now.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or_default()
}
