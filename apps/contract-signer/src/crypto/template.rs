//! Template content hashing.
//!
//! [`DirectoryHasher`] digests every regular file under a template directory
//! in sorted relative-path order. Each file contributes its `/`-separated
//! relative path, a NUL byte, its length as a big-endian `u64`, and its
//! contents. Only the top-level manifest and its temp and lock files are
//! skipped, so signing a template never changes its hash while every other
//! file, hidden or not, is covered.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{ContractError, ContractResult};

/// Deterministic content hash of a template directory.
pub trait TemplateHasher {
    /// Hex-encoded digest of the template at `dir`.
    fn hash_template(&self, dir: &Path) -> ContractResult<String>;
}

/// SHA-256 over a template directory's files.
#[derive(Debug, Clone)]
pub struct DirectoryHasher {
    /// Top-level names owned by the manifest store.
    excluded: [String; 3],
}

impl DirectoryHasher {
    pub fn new(manifest_file: impl Into<String>) -> Self {
        let manifest_file = manifest_file.into();
        Self {
            excluded: [
                format!(".{manifest_file}.tmp"),
                format!(".{manifest_file}.lock"),
                manifest_file,
            ],
        }
    }

    fn collect(
        &self,
        dir: &Path,
        prefix: &str,
        files: &mut Vec<(String, std::path::PathBuf)>,
    ) -> ContractResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                return Err(ContractError::InvalidInput(format!(
                    "Template file name is not UTF-8: {}",
                    entry.path().display()
                )));
            };

            if prefix.is_empty() && self.excluded.iter().any(|excluded| excluded == name) {
                continue;
            }

            let relative = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            };

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.collect(&entry.path(), &relative, files)?;
            } else if file_type.is_file() {
                files.push((relative, entry.path()));
            } else {
                tracing::debug!(path = %entry.path().display(), "Skipping non-regular template entry");
            }
        }
        Ok(())
    }
}

impl TemplateHasher for DirectoryHasher {
    fn hash_template(&self, dir: &Path) -> ContractResult<String> {
        if !dir.is_dir() {
            return Err(ContractError::TemplateNotFound(dir.display().to_string()));
        }

        let mut files = Vec::new();
        self.collect(dir, "", &mut files)?;
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        for (relative, path) in &files {
            let contents = fs::read(path)?;
            hasher.update(relative.as_bytes());
            hasher.update([0u8]);
            hasher.update((contents.len() as u64).to_be_bytes());
            hasher.update(&contents);
        }

        let digest = hex::encode(hasher.finalize());
        tracing::debug!(template = %dir.display(), files = files.len(), hash = %digest, "Hashed template");
        Ok(digest)
    }
}
