//! Classification of `git status --porcelain=v1 -z` output.

use std::fmt;
use serde::Serialize;

/// What happened to one path, as far as git can tell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileChange {
    Added { path: String },
    Modified { path: String },
    Deleted { path: String },
    /// Detected from the `R` status code, never inferred from a delete/add pair.
    Renamed { from: String, to: String },
}

impl FileChange {
    /// Current path of the file (the destination for renames).
    pub fn path(&self) -> &str {
        match self {
            Self::Added { path } | Self::Modified { path } | Self::Deleted { path } => path,
            Self::Renamed { to, .. } => to,
        }
    }

    /// Every path a commit of this change has to include.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::Renamed { from, to } => vec![from.as_str(), to.as_str()],
            other => vec![other.path()],
        }
    }
}

impl fmt::Display for FileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added { path } => write!(f, "added {path}"),
            Self::Modified { path } => write!(f, "modified {path}"),
            Self::Deleted { path } => write!(f, "deleted {path}"),
            Self::Renamed { from, to } => write!(f, "renamed {from} -> {to}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeArea {
    Image,
    Thumbnail,
    Metadata,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub change: FileChange,
    pub area: ChangeArea,
    /// Both sides touched the path in an unfinished merge.
    pub unmerged: bool,
}

/// Where the library keeps things, relative to the repository root.
#[derive(Debug, Clone)]
pub struct RepoLayout {
    pub library_dir: String,
    pub thumbs_dir: String,
    pub metadata_file: String,
}

impl RepoLayout {
    pub fn area_of(&self, path: &str) -> ChangeArea {
        let in_dir = |dir: &str| path.strip_prefix(dir.trim_end_matches('/')).is_some_and(|rest| rest.starts_with('/'));
        if path == self.metadata_file {
            ChangeArea::Metadata
        } else if in_dir(&self.library_dir) {
            ChangeArea::Image
        } else if in_dir(&self.thumbs_dir) {
            ChangeArea::Thumbnail
        } else {
            ChangeArea::Other
        }
    }

    fn area_of_change(&self, change: &FileChange) -> ChangeArea {
        match change {
            // A file moved into or out of the library still counts as one image change.
            FileChange::Renamed { from, to } => match (self.area_of(from), self.area_of(to)) {
                (ChangeArea::Image, _) | (_, ChangeArea::Image) => ChangeArea::Image,
                (_, area) => area,
            },
            other => self.area_of(other.path()),
        }
    }
}

/// Parses NUL separated porcelain v1 records. Rename and copy records carry
/// the original path in the following field.
pub fn parse_porcelain(raw: &str, layout: &RepoLayout) -> Vec<StatusEntry> {
    let mut fields = raw.split('\0').filter(|x| !x.is_empty());
    let mut entries = Vec::new();
    while let Some(record) = fields.next() {
        if record.len() < 4 || !record.is_char_boundary(3) {
            continue;
        }
        let (code, path) = (&record[..2], record[3..].to_string());
        let mut code_chars = code.chars();
        let (x, y) = (code_chars.next().unwrap_or(' '), code_chars.next().unwrap_or(' '));
        let unmerged = matches!(code, "DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU");

        let change = if x == 'R' || y == 'R' {
            let from = fields.next().unwrap_or_default().to_string();
            FileChange::Renamed { from, to: path }
        } else if x == 'C' || y == 'C' {
            fields.next();
            FileChange::Added { path }
        } else if unmerged {
            FileChange::Modified { path }
        } else if code == "??" || x == 'A' {
            FileChange::Added { path }
        } else if x == 'D' || y == 'D' {
            FileChange::Deleted { path }
        } else {
            FileChange::Modified { path }
        };
        let area = layout.area_of_change(&change);
        entries.push(StatusEntry { change, area, unmerged });
    }
    entries
}

/// Counts behind the sync badge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub images_added: usize,
    pub images_modified: usize,
    pub images_deleted: usize,
    pub images_renamed: usize,
    pub metadata_changed: bool,
    pub thumbnails_changed: usize,
    pub other_changed: usize,
    pub unmerged: usize,
}

impl ChangeSummary {
    pub fn of(entries: &[StatusEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            if entry.unmerged {
                summary.unmerged += 1;
            }
            match entry.area {
                ChangeArea::Image => match entry.change {
                    FileChange::Added { .. } => summary.images_added += 1,
                    FileChange::Modified { .. } => summary.images_modified += 1,
                    FileChange::Deleted { .. } => summary.images_deleted += 1,
                    FileChange::Renamed { .. } => summary.images_renamed += 1,
                },
                ChangeArea::Metadata => summary.metadata_changed = true,
                ChangeArea::Thumbnail => summary.thumbnails_changed += 1,
                ChangeArea::Other => summary.other_changed += 1,
            }
        }
        summary
    }

    /// Number shown on the sync badge.
    pub fn image_changes(&self) -> usize {
        self.images_added + self.images_modified + self.images_deleted + self.images_renamed
    }

    pub fn is_clean(&self) -> bool {
        self.image_changes() == 0 && !self.metadata_changed && self.thumbnails_changed == 0 && self.other_changed == 0
    }
}
