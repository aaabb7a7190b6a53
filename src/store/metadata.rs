use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;
use serde_json::Value;
use tokio::fs;

use crate::error::ApiError;

/// One page of metadata records, newest first.
#[derive(Debug, Serialize)]
pub struct ImageListing {
    pub items: Vec<Value>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

#[derive(Clone, Debug)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Writes the sidecar record for an image file, named after the image's
    /// identifier. Returns the metadata filename.
    pub async fn save(&self, image_filename: &str, metadata: &Value) -> Result<String, ApiError> {
        let id = strip_extension(image_filename);
        let filename = format!("{id}.json");
        let payload = serde_json::to_vec_pretty(metadata)
            .map_err(|err| ApiError::Storage(format!("serialize metadata: {err}")))?;
        fs::write(self.dir.join(&filename), payload).await?;
        Ok(filename)
    }

    /// `None` when the record does not exist; a record that exists but does
    /// not parse is a storage failure.
    pub async fn get(&self, filename: &str) -> Result<Option<Value>, ApiError> {
        let path = self.dir.join(filename);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value = serde_json::from_slice(&bytes)
            .map_err(|err| ApiError::Storage(format!("malformed metadata {filename}: {err}")))?;
        Ok(Some(value))
    }

    pub async fn delete(&self, filename: &str) -> Result<(), ApiError> {
        let path = self.dir.join(filename);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// One-indexed pagination over all records, ordered by modification time
    /// descending. A page past the end yields an empty item list with the
    /// correct total. A record that no longer parses is excluded from both
    /// the items and the total, so pages stay full and the count stays
    /// honest; a point lookup of the same record still reports the failure.
    pub async fn list(&self, page: usize, per_page: usize) -> Result<ImageListing, ApiError> {
        if page == 0 {
            return Err(ApiError::InvalidArgument("page must be positive".to_string()));
        }
        if per_page == 0 {
            return Err(ApiError::InvalidArgument(
                "per_page must be positive".to_string(),
            ));
        }

        let mut records: Vec<(SystemTime, PathBuf, Value)> = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ImageListing {
                    items: Vec::new(),
                    page,
                    per_page,
                    total: 0,
                });
            }
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            let bytes = fs::read(&path).await?;
            let mut value: Value = match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "excluding malformed metadata record from listing");
                    continue;
                }
            };
            if let (Value::Object(map), Some(stem)) =
                (&mut value, path.file_stem().and_then(|stem| stem.to_str()))
            {
                map.insert("image_id".to_string(), Value::String(stem.to_string()));
            }
            records.push((modified, path, value));
        }
        // newest first; filename as a stable tiebreak
        records.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        let total = records.len();
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        let items = records
            .into_iter()
            .skip(offset)
            .take(per_page)
            .map(|(_, _, value)| value)
            .collect();

        Ok(ImageListing {
            items,
            page,
            per_page,
            total,
        })
    }
}

fn strip_extension(filename: &str) -> &str {
    filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename)
}
