//! Directory-backed presence registry.
//!
//! One file per key under a shared directory, so every mesh daemon on the
//! host sees the same registry:
//!   {root}/{hex(key)}.json
//!
//! Writes go to a per-writer temp file and are renamed into place, so a
//! reader sees either the old record or the new one. Readers still treat
//! anything unparseable as absent; the registry is best-effort only.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use mesh_services::{PresenceRegistry, RegistryError};

const EXT: &str = "json";

#[derive(Clone)]
pub struct FsRegistry {
    root: PathBuf,
}

impl FsRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| RegistryError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{EXT}", hex::encode(key)))
    }

    fn key_of(path: &Path) -> Option<String> {
        if path.extension()? != EXT {
            return None;
        }
        let bytes = hex::decode(path.file_stem()?.to_str()?).ok()?;
        String::from_utf8(bytes).ok()
    }
}

fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io {
        key: key.to_string(),
        source,
    }
}

impl PresenceRegistry for FsRegistry {
    fn set(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        let path = self.path(key);
        let tmp = path.with_extension(format!("{}.{}.tmp", std::process::id(), rand::random::<u32>()));
        {
            let mut file = fs::File::create(&tmp).map_err(io_err(key))?;
            file.write_all(value.as_bytes()).map_err(io_err(key))?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(key)(e));
        }
        tracing::trace!(key, "presence record written");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        match fs::read_to_string(self.path(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            // half-written or foreign junk
            Err(e) if e.kind() == ErrorKind::InvalidData => Ok(None),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        let entries = fs::read_dir(&self.root).map_err(io_err(prefix))?;
        Ok(entries
            .flatten()
            .filter_map(|entry| Self::key_of(&entry.path()))
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    fn delete(&self, key: &str) -> Result<(), RegistryError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(key)(e)),
        }
    }
}
