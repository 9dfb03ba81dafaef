//! File-backed manifest repository.
//!
//! Each template directory holds exactly one manifest file. Writes go to a
//! sibling temp file which is synced and renamed over the manifest, so a
//! crash never leaves a partially written manifest behind.
//!
//! Read-modify-write sequences must hold [`ManifestLock`] for the template.
//! The lock is an advisory `flock` on a sibling lock file and serializes
//! writers across threads and processes alike.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::config::{Settings, validate_path_component};
use crate::error::{ContractError, ContractResult};
use crate::manifest::schema::{self, DecodedManifest};
use crate::manifest::types::Manifest;

/// Manifest repository rooted at the templates directory.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    templates_dir: PathBuf,
    manifest_file: String,
}

/// Exclusive lock over one template's manifest. Released on drop.
#[derive(Debug)]
pub struct ManifestLock {
    file: File,
    template: String,
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(template = %self.template, error = %e, "Failed to release manifest lock");
        }
    }
}

impl ManifestStore {
    pub fn new(templates_dir: impl Into<PathBuf>, manifest_file: impl Into<String>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            manifest_file: manifest_file.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.templates_dir(), settings.manifest_file())
    }

    /// Name of the manifest file inside each template directory.
    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    /// Directory of a template; must exist for any write.
    pub fn template_dir(&self, template: &str) -> ContractResult<PathBuf> {
        validate_path_component("template name", template)?;
        Ok(self.templates_dir.join(template))
    }

    pub fn manifest_path(&self, template: &str) -> ContractResult<PathBuf> {
        Ok(self.template_dir(template)?.join(&self.manifest_file))
    }

    fn temp_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!(".{}.tmp", self.manifest_file))
    }

    fn lock_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!(".{}.lock", self.manifest_file))
    }

    fn existing_template_dir(&self, template: &str) -> ContractResult<PathBuf> {
        let dir = self.template_dir(template)?;
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(ContractError::TemplateNotFound(template.to_string()))
        }
    }

    /// Acquire the exclusive manifest lock for `template`, blocking until available.
    pub fn lock(&self, template: &str) -> ContractResult<ManifestLock> {
        let dir = self.existing_template_dir(template)?;
        let path = self.lock_path(&dir);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| ContractError::LockFailed(format!("{}: {e}", path.display())))?;

        file.lock_exclusive()
            .map_err(|e| ContractError::LockFailed(format!("{}: {e}", path.display())))?;

        tracing::trace!(template, "Acquired manifest lock");
        Ok(ManifestLock {
            file,
            template: template.to_string(),
        })
    }

    /// Load a manifest along with the schema version it was stored in.
    pub fn load_decoded(&self, template: &str) -> ContractResult<DecodedManifest> {
        let path = self.manifest_path(template)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ContractError::ManifestNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };

        let decoded = schema::decode(&bytes, &path)?;
        if decoded.needs_migration() {
            tracing::info!(
                template,
                source_version = decoded.source_version,
                target_version = schema::CURRENT_SCHEMA_VERSION,
                "Manifest uses an older schema; it will be migrated on next save"
            );
        }
        Ok(decoded)
    }

    /// Load a manifest.
    ///
    /// Fails with `ManifestNotFound` when absent and `ManifestCorrupt` when
    /// the file does not match any supported schema.
    pub fn load(&self, template: &str) -> ContractResult<Manifest> {
        Ok(self.load_decoded(template)?.manifest)
    }

    /// Load a manifest, treating a missing file as empty.
    pub fn load_or_empty(&self, template: &str) -> ContractResult<Manifest> {
        match self.load(template) {
            Err(ContractError::ManifestNotFound(path)) => {
                tracing::debug!(path = %path.display(), "No manifest yet, starting empty");
                Ok(Manifest::new())
            }
            other => other,
        }
    }

    /// Atomically replace the manifest for `template`.
    pub fn save(&self, template: &str, manifest: &Manifest) -> ContractResult<()> {
        let dir = self.existing_template_dir(template)?;
        let path = dir.join(&self.manifest_file);
        let tmp_path = self.temp_path(&dir);
        let bytes = schema::encode(manifest)?;

        let written = (|| -> std::io::Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
            fs::rename(&tmp_path, &path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(ContractError::Storage(format!(
                "Failed to write manifest {}: {e}",
                path.display()
            )));
        }

        tracing::debug!(
            template,
            parties = manifest.parties.len(),
            template_authors = manifest.template_authors.len(),
            "Stored manifest"
        );
        Ok(())
    }

    /// Replace the manifest with empty buckets. Idempotent.
    pub fn reset(&self, template: &str) -> ContractResult<Manifest> {
        let manifest = Manifest::new();
        self.save(template, &manifest)?;
        Ok(manifest)
    }
}
