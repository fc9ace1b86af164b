#![forbid(unsafe_code)]

//! The directory finished downloads are written to and served from.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::FetchResult;

/// URL prefix the directory is mounted under.
pub const PUBLIC_PREFIX: &str = "/downloads";

#[derive(Debug, Clone)]
pub struct DownloadsDir {
    root: PathBuf,
}

impl DownloadsDir {
    /// Creates the directory when missing. Safe to call repeatedly.
    pub async fn prepare(root: impl Into<PathBuf>) -> FetchResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Relative URL clients use to fetch `filename`.
    pub fn public_url(filename: &str) -> String {
        format!("{PUBLIC_PREFIX}/{filename}")
    }

    /// Size of a finished download, or `None` when it is not a regular file.
    pub async fn stat(&self, filename: &str) -> Option<u64> {
        match tokio::fs::metadata(self.path_for(filename)).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            _ => None,
        }
    }

    /// Removes whatever a failed download left behind: the target itself and
    /// yt-dlp's `.part` file.
    pub async fn remove_partial(&self, filename: &str) {
        let target = self.path_for(filename);
        let part = self.path_for(&format!("{filename}.part"));
        for path in [target, part] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed partial download"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), "could not remove partial download: {err}"),
            }
        }
    }

    /// Maps a single URL path segment onto a file inside the directory.
    /// Anything that is not a plain file name is refused.
    pub fn resolve(&self, segment: &str) -> Option<PathBuf> {
        if !is_plain_segment(segment) {
            return None;
        }
        Some(self.root.join(segment))
    }
}

/// True for a single, normal path component (no `..`, `/`, or root).
pub fn is_plain_segment(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
