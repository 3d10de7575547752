use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{digest::Digest, error::ModuleError, model::ParseError, module_key::ModuleKey};

use super::FullName;

/// The pinned commits and digests of a workspace's remote dependencies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockFile {
    #[serde(default)]
    pub modules: Vec<LockedModule>,
}

const VERSION: i64 = 1;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct VersionedLockFile<'a> {
    pub version: i64,
    #[serde(flatten)]
    pub content: &'a LockFile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedModule {
    pub name: FullName,
    /// Dashless commit id.
    pub commit: String,
    pub digest: Digest,
}

impl LockFile {
    pub fn from_file(file: &Path) -> Result<LockFile, ParseError> {
        LockFile::from_str(&std::fs::read_to_string(file)?)
    }

    pub fn from_str(s: &str) -> Result<LockFile, ParseError> {
        let mut table = toml::from_str::<toml::Table>(s)?;
        match table.remove("version") {
            Some(toml::Value::Integer(VERSION)) => table.try_into::<LockFile>().map_err(Into::into),
            Some(other) => Err(ParseError::UnsupportedLockFileVersion(other)),
            None => Err(ParseError::MissingLockFileVersion),
        }
    }

    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&VersionedLockFile {
            version: VERSION,
            content: self,
        })
    }

    /// Records the keys sorted by name. Loads every key's digest.
    pub fn from_module_keys(module_keys: &[ModuleKey]) -> Result<LockFile, ModuleError> {
        let mut modules = module_keys
            .iter()
            .map(|module_key| {
                Ok(LockedModule {
                    name: module_key.full_name().clone(),
                    commit: module_key.commit_id().simple().to_string(),
                    digest: module_key.digest()?,
                })
            })
            .collect::<Result<Vec<_>, ModuleError>>()?;
        modules.sort_by_key(|module| module.name.to_string());
        Ok(LockFile { modules })
    }

    pub fn to_module_keys(&self) -> Result<Vec<ModuleKey>, ParseError> {
        self.modules
            .iter()
            .map(|module| {
                let commit_id = Uuid::parse_str(&module.commit)
                    .ok()
                    .filter(|commit_id| !commit_id.is_nil())
                    .ok_or_else(|| ParseError::InvalidCommitId(module.commit.clone()))?;
                ModuleKey::with_digest(module.name.clone(), commit_id, module.digest.clone())
                    .map_err(|e| ParseError::InvalidModuleKey(e.to_string()))
            })
            .collect()
    }
}
