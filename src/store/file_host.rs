// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Document host backed by a single file on disk.

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;

use super::{DocumentHost, HostError, PersistOutcome};
use crate::model::Document;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WriteDurability {
    /// Writes a temp file and renames it into place, without fsync.
    #[default]
    BestEffort,

    /// Also flushes file contents and the rename to stable storage where the platform allows.
    Durable,
}

#[derive(Debug, Clone)]
pub struct FileDocumentHost {
    path: PathBuf,
    durability: WriteDurability,
}

impl FileDocumentHost {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), durability: WriteDurability::default() }
    }

    pub fn with_durability(mut self, durability: WriteDurability) -> Self {
        self.durability = durability;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentHost for FileDocumentHost {
    async fn current_document_text(&self) -> Result<String, HostError> {
        let path = self.path.clone();
        off_runtime(move || fs::read_to_string(&path).map_err(|source| HostError::Io { path, source })).await
    }

    async fn persist_document_text(
        &self,
        text: &str,
        description: Option<&str>,
    ) -> Result<PersistOutcome, HostError> {
        if let Err(err) = Document::parse(text) {
            return Ok(PersistOutcome::rejected(format!("refusing to write malformed XML: {err}")));
        }
        let path = self.path.clone();
        let contents = text.as_bytes().to_vec();
        let durability = self.durability;
        off_runtime(move || write_atomic(&path, &contents, durability)).await?;
        debug!(path = ?self.path, description = description.unwrap_or(""), bytes = text.len(), "document written");
        Ok(PersistOutcome::accepted())
    }
}

/// Runs blocking file work on tokio's blocking pool so host timeouts can still fire.
async fn off_runtime<T, F>(work: F) -> Result<T, HostError>
where
    F: FnOnce() -> Result<T, HostError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| HostError::Unavailable(format!("file task failed: {err}")))?
}

fn write_atomic(path: &Path, contents: &[u8], durability: WriteDurability) -> Result<(), HostError> {
    let io_error = |path: &Path, source: io::Error| HostError::Io { path: path.to_path_buf(), source };

    match fs::symlink_metadata(path) {
        Ok(md) if md.file_type().is_symlink() => {
            return Err(io_error(path, io::Error::other("refusing to write through a symlink")));
        }
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(source) => return Err(io_error(path, source)),
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let Some(file_name) = path.file_name() else {
        return Err(io_error(path, io::Error::other("path has no file name")));
    };

    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let tmp_path = parent.join(format!(".proteus.tmp.{}.{}", file_name.to_string_lossy(), nanos));

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .map_err(|source| io_error(&tmp_path, source))?;
    file.write_all(contents).map_err(|source| io_error(&tmp_path, source))?;
    if durability == WriteDurability::Durable {
        file.sync_all().map_err(|source| io_error(&tmp_path, source))?;
    }
    drop(file);

    let mut replaced = fs::rename(&tmp_path, path);
    // Windows will not rename onto an existing file.
    let occupied = matches!(
        &replaced,
        Err(err) if matches!(err.kind(), io::ErrorKind::AlreadyExists | io::ErrorKind::PermissionDenied)
    );
    if cfg!(windows) && occupied {
        let _ = fs::remove_file(path);
        replaced = fs::rename(&tmp_path, path);
    }
    if let Err(source) = replaced {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_error(path, source));
    }

    if durability == WriteDurability::Durable {
        #[cfg(unix)]
        {
            let dir = fs::File::open(parent).map_err(|source| io_error(parent, source))?;
            dir.sync_all().map_err(|source| io_error(parent, source))?;
        }
    }

    Ok(())
}
