//! Quota Journal
//!
//! Line-oriented edits of the host files that map quota projects to volume
//! directories (`/etc/projects`, `/etc/projid`) and of the mount table.
//! Each edit reads the whole file, drops one line and rewrites the file.
//!
//! When no line contains the token, line 0 is dropped anyway. Callers see
//! this through [`LineRemoval::matched`] and log it.

use crate::config::HostFiles;
use crate::error::Result;
use std::path::Path;
use tracing::{debug, warn};

/// Which line an edit removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRemoval {
    pub index: usize,
    /// False when the token was absent and line 0 was removed instead
    pub matched: bool,
}

/// Remove the last line containing `token` from `content`
pub fn drop_last_match(content: &str, token: &str) -> (String, LineRemoval) {
    let mut lines: Vec<&str> = content.split('\n').collect();

    let removal = match lines.iter().rposition(|line| line.contains(token)) {
        Some(index) => LineRemoval { index, matched: true },
        None => LineRemoval {
            index: 0,
            matched: false,
        },
    };
    lines.remove(removal.index);

    (lines.join("\n"), removal)
}

/// Rewrite `path` without the last line containing `token`
pub async fn remove_last_line_containing(path: &Path, token: &str) -> Result<LineRemoval> {
    let content = tokio::fs::read_to_string(path).await?;
    let (rewritten, removal) = drop_last_match(&content, token);
    tokio::fs::write(path, rewritten).await?;

    if removal.matched {
        debug!(file = %path.display(), line = removal.index, token, "Removed line");
    } else {
        warn!(
            file = %path.display(),
            token,
            "Token not found, removed the first line instead"
        );
    }
    Ok(removal)
}

/// Edits of the quota and mount files for one volume directory
#[derive(Debug, Clone)]
pub struct QuotaJournal {
    files: HostFiles,
}

impl QuotaJournal {
    pub fn new(files: HostFiles) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &HostFiles {
        &self.files
    }

    /// Drop the project's line from the projects file
    pub async fn forget_project(&self, project: &str) -> Result<LineRemoval> {
        remove_last_line_containing(&self.files.projects, project).await
    }

    /// Drop the project's line from the project id file
    pub async fn forget_project_id(&self, project: &str) -> Result<LineRemoval> {
        remove_last_line_containing(&self.files.projid, project).await
    }

    /// Drop the mount table line referencing `path`
    pub async fn forget_mount(&self, path: &Path) -> Result<LineRemoval> {
        remove_last_line_containing(&self.files.mount_table, &path.to_string_lossy()).await
    }
}
