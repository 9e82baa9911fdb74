//! Append-only, file-backed document body.
//!
//! The buffer file is the single source of truth for what gets rendered. Its
//! layout is always:
//!
//! ```text
//! # {title}
//!
//! ## Section one
//! ...
//!
//! ## Section two
//! ...
//! ```
//!
//! Each append is one `write_all` of a complete chunk followed by `flush` and
//! `sync_data`, so a crash leaves the file ending at a section boundary.

use std::path::{Path, PathBuf};

use pipeline::{BufferError, BufferStats};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Counts returned by [`DocumentBuffer::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReport {
    /// Words and lines of the appended text alone.
    pub added: BufferStats,
    /// Words and lines of the whole buffer after the append.
    pub total: BufferStats,
}

#[derive(Debug)]
pub struct DocumentBuffer {
    path: PathBuf,
    total: BufferStats,
    ends_with_newline: bool,
}

impl DocumentBuffer {
    /// Creates or truncates the file at `path` and writes the document title.
    pub async fn initialize(path: impl Into<PathBuf>, title: &str) -> Result<Self, BufferError> {
        let path = path.into();
        let header = format!("# {}\n", title.trim());
        let mut file = File::create(&path).await.map_err(|e| io_error(&path, e))?;
        write_durably(&mut file, &path, header.as_bytes()).await?;
        tracing::debug!(path = %path.display(), "Document buffer initialised");
        Ok(Self {
            path,
            total: BufferStats::of(&header),
            ends_with_newline: true,
        })
    }

    /// Opens an existing buffer without truncating it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, BufferError> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        Ok(Self {
            total: BufferStats::of(&content),
            ends_with_newline: content.is_empty() || content.ends_with('\n'),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `text` after exactly one blank line.
    ///
    /// Leading blank lines and trailing whitespace of `text` are dropped.
    /// Text that is empty after that is rejected.
    pub async fn append(&mut self, text: &str) -> Result<AppendReport, BufferError> {
        let body = normalize(text);
        if body.is_empty() {
            return Err(BufferError::EmptyAppend);
        }

        let separator = if self.ends_with_newline { "\n" } else { "\n\n" };
        let chunk = format!("{separator}{body}\n");

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        write_durably(&mut file, &self.path, chunk.as_bytes()).await?;

        // A buffer that already ends in '\n' gains exactly the chunk's lines.
        let chunk_stats = if self.ends_with_newline {
            BufferStats::of(&chunk)
        } else {
            BufferStats {
                lines: BufferStats::of(&chunk).lines - 1,
                ..BufferStats::of(&chunk)
            }
        };
        self.total = self.total + chunk_stats;
        self.ends_with_newline = true;

        let report = AppendReport {
            added: BufferStats::of(body),
            total: self.total,
        };
        tracing::debug!(
            added_words = report.added.words,
            total_words = report.total.words,
            total_lines = report.total.lines,
            "Appended to document buffer"
        );
        Ok(report)
    }

    /// The full current content.
    pub async fn read_all(&self) -> Result<String, BufferError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))
    }

    /// Word and line counts of the full current content, read from disk.
    pub async fn stats(&self) -> Result<BufferStats, BufferError> {
        Ok(BufferStats::of(&self.read_all().await?))
    }

    /// Counts tracked since this handle was created; no I/O.
    pub fn cached_stats(&self) -> BufferStats {
        self.total
    }
}

fn normalize(text: &str) -> &str {
    let mut rest = text.trim_end();
    while let Some(idx) = rest.find('\n') {
        if rest[..idx].trim().is_empty() {
            rest = &rest[idx + 1..];
        } else {
            break;
        }
    }
    if rest.trim().is_empty() {
        ""
    } else {
        rest
    }
}

async fn write_durably(file: &mut File, path: &Path, bytes: &[u8]) -> Result<(), BufferError> {
    file.write_all(bytes).await.map_err(|e| io_error(path, e))?;
    file.flush().await.map_err(|e| io_error(path, e))?;
    file.sync_data().await.map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: std::io::Error) -> BufferError {
    BufferError::Io {
        path: path.to_path_buf(),
        source,
    }
}
