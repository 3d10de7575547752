mod memory;

use std::sync::Arc;

use thiserror::Error;

pub use memory::MemoryModuleProvider;

use crate::{
    bucket::{ObjectData, ReadBucket},
    digest::{Digest, DigestType},
    error::Result,
    model::FullName,
    module_key::ModuleKey,
    module_set::{ModuleSet, ModuleSetBuilder},
};

/// Failures reported by a registry. They reach callers unchanged, wrapped in
/// [`crate::error::ModuleError::Provider`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{0} was not found")]
    NotFound(String),
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Content and declared dependencies of one module at one commit.
#[derive(Clone)]
pub struct ModuleData {
    pub module_key: ModuleKey,
    pub bucket: Arc<dyn ReadBucket>,
    /// Dependencies the module was pushed with, pruned and pinned.
    pub dep_module_keys: Vec<ModuleKey>,
    pub v1_buf_yaml: Option<ObjectData>,
    pub v1_buf_lock: Option<ObjectData>,
}

impl std::fmt::Debug for ModuleData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleData")
            .field("module_key", &self.module_key)
            .field("dep_module_keys", &self.dep_module_keys)
            .finish()
    }
}

pub trait ModuleKeyProvider: Send + Sync {
    /// Resolves a reference (a label such as `main`, or a commit id) of the
    /// named module to a key.
    fn module_key_for_ref(&self, full_name: &FullName, reference: &str) -> Result<ModuleKey>;
}

pub trait ModuleDataProvider: Send + Sync {
    /// One `ModuleData` per key, in the order of `module_keys`.
    fn module_datas_for_module_keys(&self, module_keys: &[ModuleKey]) -> Result<Vec<ModuleData>>;

    /// One digest per key, in the order of `module_keys`.
    fn digests_for_module_keys(
        &self,
        module_keys: &[ModuleKey],
        digest_type: DigestType,
    ) -> Result<Vec<Digest>>;
}

/// Builds a set with the modules behind `module_keys` as targets and their
/// declared dependencies as non-targets.
pub fn module_set_for_module_keys<P>(provider: &P, module_keys: &[ModuleKey]) -> Result<ModuleSet>
where
    P: ModuleDataProvider + ?Sized,
{
    let module_datas = provider.module_datas_for_module_keys(module_keys)?;
    let mut dep_module_keys: Vec<ModuleKey> = Vec::new();
    for module_data in &module_datas {
        for dep_module_key in &module_data.dep_module_keys {
            let seen = dep_module_keys.iter().any(|existing| {
                existing.full_name() == dep_module_key.full_name()
                    && existing.commit_id() == dep_module_key.commit_id()
            });
            if !seen {
                dep_module_keys.push(dep_module_key.clone());
            }
        }
    }

    let mut builder = ModuleSetBuilder::new();
    for module_data in module_datas {
        builder = builder.add_remote_module_data(module_data, true);
    }
    if !dep_module_keys.is_empty() {
        for module_data in provider.module_datas_for_module_keys(&dep_module_keys)? {
            builder = builder.add_remote_module_data(module_data, false);
        }
    }
    builder.build()
}
