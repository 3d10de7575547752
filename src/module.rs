use std::{ops::Deref, sync::Arc};

use log::debug;
use uuid::Uuid;

use crate::{
    bucket::{ModuleReadBucket, ObjectData, ReadBucket},
    digest::{b4_digest, b5_digest, Digest, DigestType},
    error::{ModuleError, Result},
    model::FullName,
    module_key::ModuleKey,
    module_set::{ModuleSet, ModuleSetInner},
    resolver,
    sync::{OnceFn, OnceValue},
};

pub(crate) type BucketFn = Arc<OnceFn<Arc<dyn ReadBucket>>>;
pub(crate) type ObjectDataFn = Arc<OnceFn<Option<ObjectData>>>;
pub(crate) type ModuleKeysFn = Arc<OnceFn<Vec<ModuleKey>>>;

/// Everything needed to construct a module inside a set.
pub(crate) struct ModuleInit {
    pub bucket: BucketFn,
    pub bucket_id: String,
    pub description: Option<String>,
    pub full_name: Option<FullName>,
    pub commit_id: Uuid,
    pub is_target: bool,
    pub is_local: bool,
    pub v1_buf_yaml: ObjectDataFn,
    pub v1_buf_lock: ObjectDataFn,
    pub dep_module_keys_b5: ModuleKeysFn,
    pub target_paths: Vec<String>,
    pub target_exclude_paths: Vec<String>,
}

/// The state of one module, owned by its set.
pub(crate) struct ModuleEntry {
    opaque_id: String,
    bucket_id: String,
    description: String,
    full_name: Option<FullName>,
    commit_id: Uuid,
    is_target: bool,
    is_local: bool,
    read_bucket: ModuleReadBucket,
    v1_buf_yaml: ObjectDataFn,
    v1_buf_lock: ObjectDataFn,
    dep_module_keys_b5: ModuleKeysFn,
    b4_digest: OnceValue<Digest>,
    b5_digest: OnceValue<Digest>,
    // indices into the owning set; holding `Module`s here would be a cycle
    module_deps: OnceValue<Vec<(usize, bool)>>,
}

impl ModuleEntry {
    pub(crate) fn new(init: ModuleInit) -> Result<ModuleEntry> {
        if init.bucket_id.is_empty() && init.full_name.is_none() {
            return Err(ModuleError::internal(
                "bucket id was empty and full name was absent when constructing a module, one of these must be set",
            ));
        }
        if !init.is_local && init.full_name.is_none() {
            return Err(ModuleError::internal(
                "full name not present when constructing a remote module",
            ));
        }
        if init.full_name.is_none() && !init.commit_id.is_nil() {
            return Err(ModuleError::internal(
                "full name not present and commit id present when constructing a module",
            ));
        }
        // Modules with the same name always share an OpaqueID.
        let opaque_id = match &init.full_name {
            Some(full_name) => full_name.to_string(),
            None => init.bucket_id.clone(),
        };
        let description = init
            .description
            .filter(|description| !description.is_empty())
            .unwrap_or_else(|| opaque_id.clone());
        let read_bucket = ModuleReadBucket::new(
            description.clone(),
            init.bucket,
            init.is_target,
            init.target_paths,
            init.target_exclude_paths,
        )?;
        Ok(ModuleEntry {
            opaque_id,
            bucket_id: init.bucket_id,
            description,
            full_name: init.full_name,
            commit_id: init.commit_id,
            is_target: init.is_target,
            is_local: init.is_local,
            read_bucket,
            v1_buf_yaml: init.v1_buf_yaml,
            v1_buf_lock: init.v1_buf_lock,
            dep_module_keys_b5: init.dep_module_keys_b5,
            b4_digest: OnceValue::new(),
            b5_digest: OnceValue::new(),
            module_deps: OnceValue::new(),
        })
    }

    /// A copy with a different target flag and empty caches. The lazily loaded
    /// inputs (bucket, configuration data, dependency keys) stay shared.
    pub(crate) fn with_is_target(&self, is_target: bool) -> ModuleEntry {
        ModuleEntry {
            opaque_id: self.opaque_id.clone(),
            bucket_id: self.bucket_id.clone(),
            description: self.description.clone(),
            full_name: self.full_name.clone(),
            commit_id: self.commit_id,
            is_target,
            is_local: self.is_local,
            read_bucket: self.read_bucket.with_is_target(is_target),
            v1_buf_yaml: self.v1_buf_yaml.clone(),
            v1_buf_lock: self.v1_buf_lock.clone(),
            dep_module_keys_b5: self.dep_module_keys_b5.clone(),
            b4_digest: OnceValue::new(),
            b5_digest: OnceValue::new(),
            module_deps: OnceValue::new(),
        }
    }

    pub(crate) fn opaque_id(&self) -> &str {
        &self.opaque_id
    }

    pub(crate) fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub(crate) fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn full_name(&self) -> Option<&FullName> {
        self.full_name.as_ref()
    }

    pub(crate) fn commit_id(&self) -> Uuid {
        self.commit_id
    }

    pub(crate) fn is_target(&self) -> bool {
        self.is_target
    }

    pub(crate) fn is_local(&self) -> bool {
        self.is_local
    }

    pub(crate) fn read_bucket(&self) -> &ModuleReadBucket {
        &self.read_bucket
    }
}

/// A module: a named, content-addressable set of .proto files plus metadata.
///
/// A `Module` is a cheap handle into the [`ModuleSet`] it was built in and
/// always reports that set from [`Module::module_set`].
#[derive(Clone)]
pub struct Module {
    set: Arc<ModuleSetInner>,
    index: usize,
}

impl Module {
    pub(crate) fn new(set: Arc<ModuleSetInner>, index: usize) -> Module {
        Module { set, index }
    }

    fn entry(&self) -> &ModuleEntry {
        &self.set.entries[self.index]
    }

    /// Identifies the module within its set: the full name if present,
    /// otherwise the bucket id.
    pub fn opaque_id(&self) -> &str {
        self.entry().opaque_id()
    }

    /// May be empty for modules that were not built from a bucket.
    pub fn bucket_id(&self) -> &str {
        self.entry().bucket_id()
    }

    /// Always present for remote modules.
    pub fn full_name(&self) -> Option<&FullName> {
        self.entry().full_name()
    }

    /// `Uuid::nil()` if the module is not pinned to a commit.
    pub fn commit_id(&self) -> Uuid {
        self.entry().commit_id()
    }

    /// Human-readable label, falls back to the OpaqueID.
    pub fn description(&self) -> &str {
        self.entry().description()
    }

    pub fn is_target(&self) -> bool {
        self.entry().is_target()
    }

    pub fn is_local(&self) -> bool {
        self.entry().is_local()
    }

    pub fn read_bucket(&self) -> &ModuleReadBucket {
        self.entry().read_bucket()
    }

    pub fn module_set(&self) -> ModuleSet {
        ModuleSet::from_inner(self.set.clone())
    }

    /// Original v1 `buf.yaml` content, used only for B4 digests.
    pub fn v1_buf_yaml_object_data(&self) -> Result<Option<ObjectData>> {
        self.entry().v1_buf_yaml.call()
    }

    /// Original v1 `buf.lock` content, used only for B4 digests.
    pub fn v1_buf_lock_object_data(&self) -> Result<Option<ObjectData>> {
        self.entry().v1_buf_lock.call()
    }

    /// The module digest of the given type, computed once per module.
    pub fn digest(&self, digest_type: DigestType) -> Result<Digest> {
        let entry = self.entry();
        let cell = match digest_type {
            DigestType::B4 => &entry.b4_digest,
            DigestType::B5 => &entry.b5_digest,
        };
        cell.get_or_compute(|| {
            debug!("Computing {} digest for {}", digest_type, self.description());
            self.compute_digest(digest_type)
        })
    }

    /// Direct and transitive dependencies, pruned to modules reachable through
    /// import statements, sorted by OpaqueID.
    pub fn module_deps(&self) -> Result<Vec<ModuleDep>> {
        let deps = self
            .entry()
            .module_deps
            .get_or_compute(|| resolver::module_dep_indices(&self.set, self.index))?;
        Ok(deps
            .into_iter()
            .map(|(index, is_direct)| ModuleDep {
                module: Module::new(self.set.clone(), index),
                is_direct,
            })
            .collect())
    }

    fn compute_digest(&self, digest_type: DigestType) -> Result<Digest> {
        let entry = self.entry();
        match digest_type {
            DigestType::B4 => {
                let v1_buf_yaml = entry.v1_buf_yaml.call()?;
                let v1_buf_lock = entry.v1_buf_lock.call()?;
                b4_digest(
                    &entry.read_bucket,
                    v1_buf_yaml.as_ref(),
                    v1_buf_lock.as_ref(),
                )
            }
            // A remote module takes its dependency digests from the keys it
            // was resolved with. Both paths order dependencies by OpaqueID,
            // which for named modules is the full name, so pushing a local
            // module and resolving it by commit yields the same digest.
            DigestType::B5 if !entry.is_local => {
                let mut dep_module_keys = entry.dep_module_keys_b5.call()?;
                dep_module_keys.sort_by_key(|module_key| module_key.full_name().to_string());
                let dep_digests = dep_module_keys
                    .iter()
                    .map(ModuleKey::digest)
                    .collect::<Result<Vec<_>>>()?;
                b5_digest(&entry.read_bucket, &dep_digests)
            }
            DigestType::B5 => {
                let module_deps = self.module_deps()?;
                self.check_no_cycle(&module_deps)?;
                let dep_digests = module_deps
                    .iter()
                    .map(|module_dep| module_dep.digest(DigestType::B5))
                    .collect::<Result<Vec<_>>>()?;
                b5_digest(&entry.read_bucket, &dep_digests)
            }
        }
    }

    // Recursing into a dependency that depends back on this module would
    // re-enter this module's digest cell.
    fn check_no_cycle(&self, module_deps: &[ModuleDep]) -> Result<()> {
        for module_dep in module_deps.iter().filter(|module_dep| module_dep.is_local()) {
            if module_dep
                .module_deps()?
                .iter()
                .any(|transitive| transitive.index == self.index)
            {
                return Err(ModuleError::DependencyCycle {
                    module: self.description().to_string(),
                    dependency: module_dep.description().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.set, &other.set) && self.index == other.index
    }
}

impl Eq for Module {}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("opaque_id", &self.opaque_id())
            .field("commit_id", &self.commit_id())
            .field("is_target", &self.is_target())
            .field("is_local", &self.is_local())
            .finish()
    }
}

/// A dependency of a module, and whether a file of the depending module
/// imports it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDep {
    module: Module,
    is_direct: bool,
}

impl ModuleDep {
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn into_module(self) -> Module {
        self.module
    }

    pub fn is_direct(&self) -> bool {
        self.is_direct
    }
}

impl Deref for ModuleDep {
    type Target = Module;

    fn deref(&self) -> &Module {
        &self.module
    }
}

pub fn module_direct_module_deps(module: &Module) -> Result<Vec<ModuleDep>> {
    Ok(module
        .module_deps()?
        .into_iter()
        .filter(ModuleDep::is_direct)
        .collect())
}

/// The key of a module pinned to a commit. The digest is computed lazily.
pub fn module_to_module_key(module: &Module, digest_type: DigestType) -> Result<ModuleKey> {
    let full_name = module
        .full_name()
        .cloned()
        .ok_or_else(|| ModuleError::FullNameRequired(module.description().to_string()))?;
    if module.commit_id().is_nil() {
        return Err(ModuleError::CommitIdRequired(module.description().to_string()));
    }
    let module = module.clone();
    ModuleKey::new(full_name, module.commit_id(), move || {
        module.digest(digest_type)
    })
}
