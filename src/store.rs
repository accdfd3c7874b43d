//! Flat directory of named files. One file is one document (or image); the
//! file name is its identity and the whole body is read or written at once.
//!
//! Nothing here locks: concurrent writers to the same name race and the last
//! full write wins.

use std::{
    io,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("A name is required.")]
    EmptyName,
    #[error("{0} is not a valid name.")]
    InvalidName(String),
    #[error("Invalid file type.")]
    UnsupportedType,
    #[error("{0} already exists.")]
    AlreadyExists(String),
    #[error("{0} does not exist.")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Which file names a store accepts for new entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accept {
    /// Plain text and markdown (`.txt`, `.md`).
    Text,
    /// Anything whose extension maps to an `image/*` MIME type.
    Images,
}

impl Accept {
    pub fn allows(self, name: &str) -> bool {
        match self {
            Accept::Text => matches!(file_extension(name).as_deref(), Some("txt" | "md")),
            Accept::Images => mime_guess::from_path(name)
                .first()
                .is_some_and(|m| m.type_() == mime_guess::mime::IMAGE),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
    accept: Accept,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, accept: Accept) -> Self {
        Self {
            dir: dir.into(),
            accept,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of all regular files in the directory, sorted. A directory that
    /// does not exist yet lists as empty.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let ft = match entry.file_type().await {
                Ok(ft) => ft,
                Err(e) => {
                    tracing::warn!("Cannot stat {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if ft.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    /// Resolve `name` to a path inside the store directory.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    pub async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.path_for(name)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    /// Resolve `name` to the path of an existing file.
    pub async fn existing_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let path = self
            .path_for(name)
            .map_err(|_| StoreError::NotFound(name.to_string()))?;
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(path),
            Ok(_) => Err(StoreError::NotFound(name.to_string())),
            Err(e) => Err(not_found_or_io(e, name)),
        }
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.existing_path(name).await?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(e, name))
    }

    /// Read as text. Invalid UTF-8 sequences become U+FFFD.
    pub async fn read_to_string(&self, name: &str) -> Result<String, StoreError> {
        let bytes = self.read(name).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Replace the whole body of an existing entry.
    pub async fn replace(&self, name: &str, content: &[u8]) -> Result<(), StoreError> {
        let path = self.existing_path(name).await?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    async fn write(&self, name: &str, content: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    /// Create a new, empty entry. Returns the trimmed name that was created.
    pub async fn create(&self, raw_name: &str) -> Result<String, StoreError> {
        let name = raw_name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        validate_name(name)?;
        if !self.accept.allows(name) {
            return Err(StoreError::UnsupportedType);
        }
        if self.exists(name).await? {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        self.write(name, b"").await?;
        Ok(name.to_string())
    }

    /// Store uploaded bytes under `name`, overwriting any existing entry.
    pub async fn put(&self, name: &str, content: &[u8]) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        validate_name(name)?;
        if !self.accept.allows(name) {
            return Err(StoreError::UnsupportedType);
        }
        self.write(name, content).await
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.existing_path(name).await?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(e, name))
    }

    /// Copy `name` to the first free `stem(copy).ext`, `stem(copy 2).ext`, ...
    /// and return the new name. Never overwrites.
    pub async fn duplicate(&self, name: &str) -> Result<String, StoreError> {
        let src = self.existing_path(name).await?;

        let mut n = 1;
        let copy_name = loop {
            let candidate = copy_name(name, n);
            if !self.exists(&candidate).await? {
                break candidate;
            }
            n += 1;
        };

        let dst = self.path_for(&copy_name)?;
        tokio::fs::copy(&src, &dst)
            .await
            .map_err(|e| not_found_or_io(e, name))?;
        Ok(copy_name)
    }
}

/// Names are single path segments.
fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::EmptyName);
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// `about.md` → `about(copy).md`; `n > 1` gives `about(copy n).md`.
fn copy_name(name: &str, n: u32) -> String {
    let suffix = if n <= 1 {
        "(copy)".to_string()
    } else {
        format!("(copy {n})")
    };
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}{suffix}.{ext}"),
        _ => format!("{name}{suffix}"),
    }
}

fn not_found_or_io(e: io::Error, name: &str) -> StoreError {
    if e.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(name.to_string())
    } else {
        StoreError::Io(e)
    }
}

/// Lowercased extension of a file name, if any.
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
}

pub fn is_markdown(name: &str) -> bool {
    file_extension(name).as_deref() == Some("md")
}

/// Content type inferred from the extension. `text/*` types get an explicit
/// UTF-8 charset.
pub fn content_type(name: &str) -> String {
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_string()
    }
}
