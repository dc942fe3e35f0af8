use std::fmt;
use std::path::Path;
use crate::error::{LibraryError, Result};
use crate::utils::str_utils::StringExtensions;

pub const SUFFIX_LEN: usize = 8;
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const FALLBACK_BASE: &str = "image";

/// A library filename split into its parts: `{base}-{suffix}.{ext}`.
///
/// The suffix is fixed for the life of an image; renames only replace `base`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryFilename {
    pub base: String,
    pub suffix: String,
    pub ext: String,
}

impl LibraryFilename {
    pub fn parse(filename: &str) -> Result<Self> {
        let malformed = || LibraryError::MalformedFilename(filename.to_string());
        let (stem, ext) = filename.rsplit_once('.').ok_or_else(malformed)?;
        let (base, suffix) = stem.rsplit_once('-').ok_or_else(malformed)?;
        let suffix_ok = suffix.len() == SUFFIX_LEN
            && suffix.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if base.is_empty() || ext.is_empty() || !suffix_ok || filename.contains(['/', '\\']) {
            return Err(malformed());
        }
        Ok(Self { base: base.to_string(), suffix: suffix.to_string(), ext: ext.to_string() })
    }

    /// Builds the filename for a fresh upload. `desired_base` wins when it
    /// survives sanitizing, then the original file stem, then a fixed fallback.
    pub fn for_upload(desired_base: &str, original_filename: &str) -> Result<Self> {
        let original = Path::new(original_filename);
        let ext = original.extension()
            .and_then(|x| x.to_str())
            .map(|x| x.to_lowercase())
            .ok_or_else(|| LibraryError::Upload(format!("'{original_filename}' has no file extension")))?;
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(LibraryError::Upload(format!("unsupported file type '.{ext}'")));
        }
        let mut base = desired_base.sanitize_base_name();
        if base.is_empty() {
            base = original.file_stem().and_then(|x| x.to_str()).unwrap_or_default().sanitize_base_name();
        }
        if base.is_empty() {
            base = FALLBACK_BASE.to_string();
        }
        Ok(Self { base, suffix: random_suffix(), ext })
    }

    /// Same suffix and extension, new base.
    pub fn with_base(&self, new_base: &str) -> Result<Self> {
        let base = new_base.sanitize_base_name();
        if base.is_empty() {
            return Err(LibraryError::invalid(format!("'{new_base}' has no usable characters")));
        }
        Ok(Self { base, ..self.clone() })
    }

    pub fn reroll_suffix(&mut self) {
        self.suffix = random_suffix();
    }
}

impl fmt::Display for LibraryFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.base, self.suffix, self.ext)
    }
}

fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..SUFFIX_LEN].to_string()
}
