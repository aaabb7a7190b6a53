use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::fs;
use uuid::Uuid;

use crate::error::ApiError;

pub const IMAGE_EXT: &str = "webp";

/// Where a generated image currently lives: still on the backend's CDN, or
/// already drained into a scoped temporary file. The temp file is deleted
/// when the `TempPath` drops, so a failed save never leaks it.
#[derive(Debug)]
pub enum ImageLocation {
    Url(String),
    File(TempPath),
}

#[derive(Clone, Debug)]
pub struct ImageStore {
    dir: PathBuf,
    http: reqwest::Client,
}

impl ImageStore {
    pub fn new(dir: PathBuf, http: reqwest::Client) -> Self {
        Self { dir, http }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Moves the image into the store under a fresh identifier and returns
    /// the new filename. Unreachable or unreadable sources surface as
    /// storage failures.
    pub async fn save(&self, location: ImageLocation) -> Result<String, ApiError> {
        let filename = format!("{}.{IMAGE_EXT}", Uuid::new_v4().simple());
        let target = self.dir.join(&filename);

        match location {
            ImageLocation::Url(url) => {
                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|err| ApiError::Storage(format!("fetch {url}: {err}")))?;
                if !response.status().is_success() {
                    return Err(ApiError::Storage(format!(
                        "fetch {url}: HTTP {}",
                        response.status()
                    )));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|err| ApiError::Storage(format!("read {url}: {err}")))?;
                fs::write(&target, &bytes).await?;
            }
            ImageLocation::File(temp) => {
                fs::copy(&temp, &target).await?;
                // dropping the TempPath removes the temp file
            }
        }

        Ok(filename)
    }

    /// Idempotent: deleting a file that is already gone is a no-op.
    pub async fn delete(&self, filename: &str) -> Result<(), ApiError> {
        let path = self.dir.join(filename);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn store(dir: &Path) -> ImageStore {
        ImageStore::new(dir.to_path_buf(), reqwest::Client::new())
    }

    #[tokio::test]
    async fn save_from_temp_file_moves_bytes_into_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"webp bytes").unwrap();
        let temp_path = temp.into_temp_path();
        let source_path = temp_path.to_path_buf();

        let filename = store.save(ImageLocation::File(temp_path)).await.unwrap();
        assert!(filename.ends_with(".webp"));

        let stored = tokio::fs::read(store.path_for(&filename)).await.unwrap();
        assert_eq!(stored, b"webp bytes");
        assert!(!source_path.exists(), "temp file should be cleaned up");
    }

    #[tokio::test]
    async fn saves_use_fresh_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut names = Vec::new();
        for _ in 0..3 {
            let mut temp = NamedTempFile::new().unwrap();
            temp.write_all(b"x").unwrap();
            names.push(
                store
                    .save(ImageLocation::File(temp.into_temp_path()))
                    .await
                    .unwrap(),
            );
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"x").unwrap();
        let filename = store
            .save(ImageLocation::File(temp.into_temp_path()))
            .await
            .unwrap();

        store.delete(&filename).await.unwrap();
        store.delete(&filename).await.unwrap();
        assert!(!store.path_for(&filename).exists());
    }
}
