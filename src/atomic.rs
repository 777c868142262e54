//! 上传临时文件与不覆盖发布的辅助方法。

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::{self, File};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{UPLOAD_TEMP_PREFIX, UPLOAD_TEMP_SUFFIX};
use crate::storage::{epoch_millis, stored_name};

const MAX_PUBLISH_ATTEMPTS: u32 = 64;

/// 写入中的上传文件，位于存储根目录下的隐藏临时文件。
pub struct TempUpload {
    root: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl TempUpload {
    /// 在存储根目录中创建隐藏的临时文件。
    pub async fn new(root: &Path) -> io::Result<Self> {
        let temp_name = format!("{UPLOAD_TEMP_PREFIX}{}{UPLOAD_TEMP_SUFFIX}", Uuid::new_v4());
        let temp_path = root.join(temp_name);
        let file = File::create(&temp_path).await?;
        Ok(Self {
            root: root.to_path_buf(),
            temp_path,
            file,
        })
    }

    /// 返回临时文件的可写句柄。
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 以 `<毫秒时间戳>-<原始名>` 发布文件，绝不覆盖已有文件。
    ///
    /// 名称冲突时时间戳递增后重试，返回最终的存储名。
    pub async fn publish(self, original: &str) -> io::Result<String> {
        self.publish_at(original, epoch_millis(SystemTime::now()))
            .await
    }

    async fn publish_at(self, original: &str, mut millis: u128) -> io::Result<String> {
        if let Err(err) = self.file.sync_all().await {
            drop(self.file);
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        drop(self.file);

        for _ in 0..MAX_PUBLISH_ATTEMPTS {
            let name = stored_name(millis, original);
            match fs::hard_link(&self.temp_path, self.root.join(&name)).await {
                Ok(()) => {
                    if let Err(err) = fs::remove_file(&self.temp_path).await {
                        warn!(path = ?self.temp_path, error = %err, "failed to remove upload temp link");
                    }
                    let _ = sync_dir(&self.root).await;
                    return Ok(name);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(name, "stored name taken, retrying");
                    millis += 1;
                }
                Err(err) => {
                    let _ = fs::remove_file(&self.temp_path).await;
                    return Err(err);
                }
            }
        }

        let _ = fs::remove_file(&self.temp_path).await;
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "no free stored name",
        ))
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    async fn write_temp(root: &Path, data: &[u8]) -> TempUpload {
        let mut upload = TempUpload::new(root).await.expect("create temp");
        upload.file_mut().write_all(data).await.expect("write temp");
        upload
    }

    #[tokio::test]
    async fn publish_never_overwrites_same_name() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();

        let first = write_temp(root, b"first").await.publish("a.txt").await.expect("publish");
        let second = write_temp(root, b"second").await.publish("a.txt").await.expect("publish");

        assert_ne!(first, second);
        assert!(first.ends_with("-a.txt"));
        assert_eq!(std::fs::read(root.join(&first)).expect("read"), b"first");
        assert_eq!(std::fs::read(root.join(&second)).expect("read"), b"second");

        let leftovers = std::fs::read_dir(root)
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn publish_skips_taken_timestamps() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let millis = 1_700_000_000_000u128;
        for offset in 0..3 {
            std::fs::write(root.join(stored_name(millis + offset, "a.txt")), b"taken")
                .expect("write existing");
        }

        let name = write_temp(root, b"fresh")
            .await
            .publish_at("a.txt", millis)
            .await
            .expect("publish");

        assert_eq!(name, stored_name(millis + 3, "a.txt"));
        assert_eq!(std::fs::read(root.join(&name)).expect("read"), b"fresh");
        for offset in 0..3 {
            let existing = root.join(stored_name(millis + offset, "a.txt"));
            assert_eq!(std::fs::read(existing).expect("read"), b"taken");
        }
    }

    #[tokio::test]
    async fn cleanup_removes_temp_file() {
        let temp = tempdir().expect("tempdir");
        let upload = write_temp(temp.path(), b"partial").await;
        upload.cleanup().await;
        assert_eq!(std::fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }
}
