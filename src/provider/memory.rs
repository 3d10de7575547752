use std::{collections::HashMap, sync::Arc};

use log::info;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{ModuleData, ModuleDataProvider, ModuleKeyProvider, ProviderError};
use crate::{
    bucket::{MemoryBucket, ObjectData, ReadBucket},
    digest::{Digest, DigestType},
    error::{ModuleError, Result},
    model::FullName,
    module::Module,
    module_key::ModuleKey,
};

const DEFAULT_LABEL: &str = "main";

struct StoredCommit {
    full_name: FullName,
    bucket: Arc<MemoryBucket>,
    dep_module_keys: Vec<ModuleKey>,
    v1_buf_yaml: Option<ObjectData>,
    v1_buf_lock: Option<ObjectData>,
    b4_digest: Digest,
    b5_digest: Digest,
}

/// An in-process registry. Pushing a module snapshots its files and pins its
/// pruned dependencies, so that resolving the pushed commit produces the
/// same B5 digest as the local module.
#[derive(Default)]
pub struct MemoryModuleProvider {
    commits: RwLock<HashMap<Uuid, StoredCommit>>,
    // full name -> label -> commit
    labels: RwLock<HashMap<String, HashMap<String, Uuid>>>,
}

impl MemoryModuleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the module at a new commit and moves the `main` label to it.
    ///
    /// Every dependency must be named and either pinned to a commit or
    /// already pushed.
    pub fn push(&self, module: &Module) -> Result<ModuleKey> {
        let full_name = module
            .full_name()
            .cloned()
            .ok_or_else(|| ModuleError::FullNameRequired(module.description().to_string()))?;

        let read_bucket = module.read_bucket();
        let mut bucket = MemoryBucket::new();
        for path in read_bucket.file_paths()? {
            let data = read_bucket.get_file(&path)?;
            bucket.insert(path, data);
        }

        let mut dep_module_keys = Vec::new();
        for module_dep in module.module_deps()? {
            let dep_full_name = module_dep.full_name().cloned().ok_or_else(|| {
                ModuleError::FullNameRequired(module_dep.description().to_string())
            })?;
            let dep_digest = module_dep.digest(DigestType::B5)?;
            let commit_id = if module_dep.commit_id().is_nil() {
                let commit_id = self
                    .labeled_commit(&dep_full_name, DEFAULT_LABEL)
                    .ok_or_else(|| {
                        ModuleError::CommitIdRequired(module_dep.description().to_string())
                    })?;
                // the label may point at older content than the local dependency
                let stored_digest = self
                    .commits
                    .read()
                    .get(&commit_id)
                    .map(|stored| stored.b5_digest.clone());
                if stored_digest.as_ref() != Some(&dep_digest) {
                    return Err(ModuleError::DependencyNotPushed {
                        module: module_dep.description().to_string(),
                        commit: commit_id.simple().to_string(),
                    });
                }
                commit_id
            } else {
                module_dep.commit_id()
            };
            dep_module_keys.push(ModuleKey::with_digest(
                dep_full_name,
                commit_id,
                dep_digest,
            )?);
        }

        let stored = StoredCommit {
            full_name: full_name.clone(),
            bucket: Arc::new(bucket),
            dep_module_keys,
            v1_buf_yaml: module.v1_buf_yaml_object_data()?,
            v1_buf_lock: module.v1_buf_lock_object_data()?,
            b4_digest: module.digest(DigestType::B4)?,
            b5_digest: module.digest(DigestType::B5)?,
        };
        let b5_digest = stored.b5_digest.clone();
        let commit_id = Uuid::new_v4();
        self.commits.write().insert(commit_id, stored);
        self.labels
            .write()
            .entry(full_name.to_string())
            .or_default()
            .insert(DEFAULT_LABEL.to_string(), commit_id);
        info!("Pushed {} at commit {}", full_name, commit_id.simple());
        ModuleKey::with_digest(full_name, commit_id, b5_digest)
    }

    fn labeled_commit(&self, full_name: &FullName, label: &str) -> Option<Uuid> {
        self.labels
            .read()
            .get(&full_name.to_string())
            .and_then(|labels| labels.get(label))
            .copied()
    }

    fn with_commit<T>(
        &self,
        module_key: &ModuleKey,
        f: impl FnOnce(&StoredCommit) -> T,
    ) -> Result<T> {
        let commits = self.commits.read();
        match commits.get(&module_key.commit_id()) {
            Some(stored) if stored.full_name == *module_key.full_name() => Ok(f(stored)),
            _ => Err(ProviderError::NotFound(module_key.to_string()).into()),
        }
    }
}

impl ModuleKeyProvider for MemoryModuleProvider {
    fn module_key_for_ref(&self, full_name: &FullName, reference: &str) -> Result<ModuleKey> {
        let commit_id = self
            .labeled_commit(full_name, reference)
            .or_else(|| Uuid::parse_str(reference).ok())
            .ok_or_else(|| ProviderError::NotFound(format!("{}:{}", full_name, reference)))?;
        let commits = self.commits.read();
        match commits.get(&commit_id) {
            Some(stored) if stored.full_name == *full_name => {
                ModuleKey::with_digest(full_name.clone(), commit_id, stored.b5_digest.clone())
            }
            _ => Err(ProviderError::NotFound(format!("{}:{}", full_name, reference)).into()),
        }
    }
}

impl ModuleDataProvider for MemoryModuleProvider {
    fn module_datas_for_module_keys(&self, module_keys: &[ModuleKey]) -> Result<Vec<ModuleData>> {
        module_keys
            .iter()
            .map(|module_key| {
                self.with_commit(module_key, |stored| {
                    let bucket: Arc<dyn ReadBucket> = stored.bucket.clone();
                    ModuleData {
                        module_key: module_key.clone(),
                        bucket,
                        dep_module_keys: stored.dep_module_keys.clone(),
                        v1_buf_yaml: stored.v1_buf_yaml.clone(),
                        v1_buf_lock: stored.v1_buf_lock.clone(),
                    }
                })
            })
            .collect()
    }

    fn digests_for_module_keys(
        &self,
        module_keys: &[ModuleKey],
        digest_type: DigestType,
    ) -> Result<Vec<Digest>> {
        module_keys
            .iter()
            .map(|module_key| {
                self.with_commit(module_key, |stored| match digest_type {
                    DigestType::B4 => stored.b4_digest.clone(),
                    DigestType::B5 => stored.b5_digest.clone(),
                })
            })
            .collect()
    }
}
