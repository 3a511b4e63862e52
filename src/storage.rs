use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

const MAX_STEM_LEN: usize = 64;
const FALLBACK_STEM: &str = "document";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: String,
    pub size_bytes: u64,
}

/// Backing store for uploaded document files. Paths handed out by `store`
/// are the values persisted in `document.filePath`.
#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    async fn store(&self, title: &str, original_name: &str, bytes: &[u8]) -> Result<StoredFile>;

    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    async fn is_file(&self, path: &str) -> bool;

    /// Returns `false` when there was nothing to remove.
    async fn remove(&self, path: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<String>>;
}

pub struct LocalFileStorage {
    base_path: PathBuf,
}

impl LocalFileStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn ensure_directory_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).await.with_context(|| {
            format!(
                "failed to create upload directory {}",
                self.base_path.display()
            )
        })
    }

    fn path_for(&self, file_name: &str) -> String {
        self.base_path.join(file_name).to_string_lossy().into_owned()
    }

    /// Opens a fresh file for the upload. When the name is already taken the
    /// next numbered variant is tried, so existing files are never clobbered.
    async fn create_unique(
        &self,
        title: &str,
        original_name: &str,
        now: NaiveDateTime,
    ) -> Result<(String, fs::File)> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = self.path_for(&stored_file_name(title, original_name, now, attempt));
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to create file {path}"))
                }
            }
        }
        bail!("no free file name for {title:?} after {MAX_NAME_ATTEMPTS} attempts")
    }

    async fn store_at(
        &self,
        title: &str,
        original_name: &str,
        bytes: &[u8],
        now: NaiveDateTime,
    ) -> Result<StoredFile> {
        self.ensure_directory_exists().await?;

        let (path, mut file) = self.create_unique(title, original_name, now).await?;
        write_or_discard(&mut file, &path, bytes).await?;

        Ok(StoredFile {
            path,
            size_bytes: bytes.len() as u64,
        })
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn store(&self, title: &str, original_name: &str, bytes: &[u8]) -> Result<StoredFile> {
        self.store_at(title, original_name, bytes, Utc::now().naive_utc())
            .await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(path)
            .await
            .with_context(|| format!("failed to read file {path}"))
    }

    async fn is_file(&self, path: &str) -> bool {
        fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    async fn remove(&self, path: &str) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to remove file {path}")),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "failed to list upload directory {}",
                        self.base_path.display()
                    )
                })
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to read upload directory entry")?
        {
            if entry.file_type().await?.is_file() {
                paths.push(self.path_for(&entry.file_name().to_string_lossy()));
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// A partially written file is removed before the error is returned.
async fn write_or_discard<W>(writer: &mut W, path: &str, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer
            .write_all(bytes)
            .await
            .with_context(|| format!("failed to write file {path}"))?;
        writer
            .flush()
            .await
            .with_context(|| format!("failed to flush file {path}"))?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    if written.is_err() {
        if let Err(err) = fs::remove_file(path).await {
            warn!(file_path = %path, error = %err, "failed to remove partially written file");
        }
    }
    written
}

/// `<sanitized-title>-<timestamp>[-<attempt>][.<ext>]`, with the extension
/// taken from the uploaded file name. Attempt 0 carries no counter.
pub fn stored_file_name(
    title: &str,
    original_name: &str,
    now: NaiveDateTime,
    attempt: u32,
) -> String {
    let stem = sanitize_title(title);
    let timestamp = now.format(TIMESTAMP_FORMAT);
    let counter = if attempt == 0 {
        String::new()
    } else {
        format!("-{attempt}")
    };
    match file_extension(original_name) {
        Some(ext) => format!("{stem}-{timestamp}{counter}.{ext}"),
        None => format!("{stem}-{timestamp}{counter}"),
    }
}

pub fn sanitize_title(title: &str) -> String {
    let mut sanitized = String::with_capacity(title.len());
    for ch in title.trim().chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '-' {
            ch
        } else {
            '_'
        };
        if mapped == '_' && sanitized.ends_with('_') {
            continue;
        }
        sanitized.push(mapped);
    }

    let trimmed: String = sanitized
        .trim_matches('_')
        .chars()
        .take(MAX_STEM_LEN)
        .collect();
    let trimmed = trimmed.trim_end_matches('_');

    if trimmed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}

fn file_extension(original_name: &str) -> Option<String> {
    Path::new(original_name.trim())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ext.chars()
                .filter(|ch| ch.is_ascii_alphanumeric())
                .collect::<String>()
        })
        .filter(|ext| !ext.is_empty())
}
