use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use log::debug;
use uuid::Uuid;

use crate::{
    bucket::{ObjectData, ReadBucket},
    error::{ModuleError, Result},
    imports::{ImportParser, LineImportParser},
    model::FullName,
    module::{Module, ModuleEntry, ModuleInit},
    module_key::ModuleKey,
    provider::ModuleData,
    sync::{KeyedCache, OnceFn},
};

/// Shared state behind a [`ModuleSet`] and every [`Module`] handle into it.
pub(crate) struct ModuleSetInner {
    pub(crate) entries: Vec<ModuleEntry>,
    opaque_id_to_index: HashMap<String, usize>,
    bucket_id_to_index: HashMap<String, usize>,
    import_parser: Arc<dyn ImportParser>,
    file_path_to_module: KeyedCache<Option<usize>>,
    file_imports: KeyedCache<Arc<[String]>>,
}

impl ModuleSetInner {
    fn new(entries: Vec<ModuleEntry>, import_parser: Arc<dyn ImportParser>) -> Result<Self> {
        let mut opaque_id_to_index = HashMap::with_capacity(entries.len());
        let mut bucket_id_to_index = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if opaque_id_to_index
                .insert(entry.opaque_id().to_string(), index)
                .is_some()
            {
                return Err(ModuleError::DuplicateOpaqueId(entry.opaque_id().to_string()));
            }
            if !entry.bucket_id().is_empty()
                && bucket_id_to_index
                    .insert(entry.bucket_id().to_string(), index)
                    .is_some()
            {
                return Err(ModuleError::DuplicateBucketId(entry.bucket_id().to_string()));
            }
        }
        Ok(ModuleSetInner {
            entries,
            opaque_id_to_index,
            bucket_id_to_index,
            import_parser,
            file_path_to_module: KeyedCache::new("file path to module"),
            file_imports: KeyedCache::new("file imports"),
        })
    }

    /// The module providing the .proto file at `path`, if any.
    pub(crate) fn module_index_for_file_path(&self, path: &str) -> Result<Option<usize>> {
        self.file_path_to_module.get_or_compute(path, || {
            let mut found = Vec::new();
            for (index, entry) in self.entries.iter().enumerate() {
                if entry.read_bucket().contains_proto_file(path)? {
                    found.push(index);
                }
            }
            match found.as_slice() {
                [] => Ok(None),
                [index] => Ok(Some(*index)),
                _ => Err(ModuleError::MultipleModulesForPath {
                    path: path.to_string(),
                    modules: found
                        .iter()
                        .map(|index| self.entries[*index].description().to_string())
                        .collect(),
                }),
            }
        })
    }

    /// Import paths declared by one file of the module at `index`.
    pub(crate) fn imports_for_file(&self, index: usize, path: &str) -> Result<Arc<[String]>> {
        let entry = &self.entries[index];
        let key = format!("{}\u{0}{}", entry.opaque_id(), path);
        self.file_imports.get_or_compute(&key, || {
            let data = entry.read_bucket().get_file(path)?;
            Ok(self.import_parser.imports(path, &data)?.into())
        })
    }
}

/// An immutable collection of modules resolved together.
///
/// Cloning is cheap and yields the same set. Sets are created with
/// [`ModuleSetBuilder`].
#[derive(Clone)]
pub struct ModuleSet {
    inner: Arc<ModuleSetInner>,
}

impl ModuleSet {
    pub fn builder() -> ModuleSetBuilder {
        ModuleSetBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<ModuleSetInner>) -> ModuleSet {
        ModuleSet { inner }
    }

    fn module(&self, index: usize) -> Module {
        Module::new(self.inner.clone(), index)
    }

    fn filtered(&self, predicate: impl Fn(&ModuleEntry) -> bool) -> Vec<Module> {
        self.inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| predicate(entry))
            .map(|(index, _)| self.module(index))
            .collect()
    }

    /// All modules, in the order they were added.
    pub fn modules(&self) -> Vec<Module> {
        self.filtered(|_| true)
    }

    pub fn target_modules(&self) -> Vec<Module> {
        self.filtered(ModuleEntry::is_target)
    }

    pub fn non_target_modules(&self) -> Vec<Module> {
        self.filtered(|entry| !entry.is_target())
    }

    pub fn local_modules(&self) -> Vec<Module> {
        self.filtered(ModuleEntry::is_local)
    }

    /// Full names of the remote modules, sorted.
    pub fn remote_module_full_names(&self) -> Vec<FullName> {
        let mut full_names = self
            .inner
            .entries
            .iter()
            .filter(|entry| !entry.is_local())
            .filter_map(|entry| entry.full_name().cloned())
            .collect::<Vec<_>>();
        full_names.sort_by_key(|full_name| full_name.to_string());
        full_names
    }

    pub fn get_module_for_opaque_id(&self, opaque_id: &str) -> Option<Module> {
        self.inner
            .opaque_id_to_index
            .get(opaque_id)
            .map(|index| self.module(*index))
    }

    pub fn get_module_for_full_name(&self, full_name: &FullName) -> Option<Module> {
        self.get_module_for_opaque_id(&full_name.to_string())
    }

    pub fn get_module_for_bucket_id(&self, bucket_id: &str) -> Option<Module> {
        self.inner
            .bucket_id_to_index
            .get(bucket_id)
            .map(|index| self.module(*index))
    }

    /// The module containing the .proto file at `path`.
    ///
    /// Fails with [`ModuleError::MultipleModulesForPath`] if more than one
    /// module contains it.
    pub fn get_module_for_file_path(&self, path: &str) -> Result<Option<Module>> {
        Ok(self
            .inner
            .module_index_for_file_path(path)?
            .map(|index| self.module(index)))
    }

    /// A new set in which exactly the modules with the given OpaqueIDs are
    /// targets. This set and its modules are left untouched; the new modules
    /// start with empty digest and dependency caches.
    pub fn with_target_opaque_ids<S: AsRef<str>>(&self, opaque_ids: &[S]) -> Result<ModuleSet> {
        let mut targets = HashSet::with_capacity(opaque_ids.len());
        for opaque_id in opaque_ids {
            let opaque_id = opaque_id.as_ref();
            if !self.inner.opaque_id_to_index.contains_key(opaque_id) {
                return Err(ModuleError::UnknownOpaqueId(opaque_id.to_string()));
            }
            targets.insert(opaque_id);
        }
        let entries = self
            .inner
            .entries
            .iter()
            .map(|entry| entry.with_is_target(targets.contains(entry.opaque_id())))
            .collect();
        let inner = ModuleSetInner::new(entries, self.inner.import_parser.clone())?;
        Ok(ModuleSet::from_inner(Arc::new(inner)))
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

impl PartialEq for ModuleSet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ModuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.modules()).finish()
    }
}

/// Options of a module read from a local bucket.
#[derive(Default)]
pub struct LocalModuleOptions {
    description: Option<String>,
    full_name: Option<FullName>,
    commit_id: Option<Uuid>,
    is_target: bool,
    target_paths: Vec<String>,
    target_exclude_paths: Vec<String>,
    v1_buf_yaml: Option<OnceFn<Option<ObjectData>>>,
    v1_buf_lock: Option<OnceFn<Option<ObjectData>>>,
}

impl LocalModuleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Human-readable label used in errors and logs.
    ///
    /// Defaults to the module's OpaqueID.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn full_name(mut self, full_name: FullName) -> Self {
        self.full_name = Some(full_name);
        self
    }

    /// Requires a full name.
    pub fn commit_id(mut self, commit_id: Uuid) -> Self {
        self.commit_id = Some(commit_id);
        self
    }

    /// Defaults to `false`.
    pub fn target(mut self, is_target: bool) -> Self {
        self.is_target = is_target;
        self
    }

    /// Restricts target files to those equal to or under one of the paths.
    ///
    /// Defaults to all files.
    pub fn target_paths(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.target_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn target_exclude_paths(
        mut self,
        paths: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.target_exclude_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn v1_buf_yaml(mut self, object_data: ObjectData) -> Self {
        self.v1_buf_yaml = Some(OnceFn::ready(Some(object_data)));
        self
    }

    /// Reads the original `buf.yaml` only if a B4 digest is requested.
    pub fn v1_buf_yaml_with<F>(mut self, get_object_data: F) -> Self
    where
        F: FnOnce() -> Result<Option<ObjectData>> + Send + 'static,
    {
        self.v1_buf_yaml = Some(OnceFn::new(get_object_data));
        self
    }

    pub fn v1_buf_lock(mut self, object_data: ObjectData) -> Self {
        self.v1_buf_lock = Some(OnceFn::ready(Some(object_data)));
        self
    }

    /// Reads the original `buf.lock` only if a B4 digest is requested.
    pub fn v1_buf_lock_with<F>(mut self, get_object_data: F) -> Self
    where
        F: FnOnce() -> Result<Option<ObjectData>> + Send + 'static,
    {
        self.v1_buf_lock = Some(OnceFn::new(get_object_data));
        self
    }
}

/// Collects local and remote modules and builds a [`ModuleSet`] from them.
///
/// When a local and a remote module share a full name, the local module is
/// kept. Two remote modules with the same full name must be at the same
/// commit.
pub struct ModuleSetBuilder {
    pending: Vec<ModuleInit>,
    import_parser: Arc<dyn ImportParser>,
}

impl Default for ModuleSetBuilder {
    fn default() -> Self {
        ModuleSetBuilder {
            pending: Vec::new(),
            import_parser: Arc::new(LineImportParser),
        }
    }
}

impl ModuleSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser used to find the imports of every .proto file.
    ///
    /// Defaults to [`LineImportParser`].
    pub fn import_parser(mut self, import_parser: Arc<dyn ImportParser>) -> Self {
        self.import_parser = import_parser;
        self
    }

    pub fn add_local_module(
        mut self,
        bucket: Arc<dyn ReadBucket>,
        bucket_id: impl Into<String>,
        options: LocalModuleOptions,
    ) -> Self {
        let LocalModuleOptions {
            description,
            full_name,
            commit_id,
            is_target,
            target_paths,
            target_exclude_paths,
            v1_buf_yaml,
            v1_buf_lock,
        } = options;
        self.pending.push(ModuleInit {
            bucket: Arc::new(OnceFn::ready(bucket)),
            bucket_id: bucket_id.into(),
            description,
            full_name,
            commit_id: commit_id.unwrap_or_else(Uuid::nil),
            is_target,
            is_local: true,
            v1_buf_yaml: Arc::new(v1_buf_yaml.unwrap_or_else(|| OnceFn::ready(None))),
            v1_buf_lock: Arc::new(v1_buf_lock.unwrap_or_else(|| OnceFn::ready(None))),
            dep_module_keys_b5: Arc::new(OnceFn::new(|| {
                Err(ModuleError::internal(
                    "declared dependency keys requested for a local module",
                ))
            })),
            target_paths,
            target_exclude_paths,
        });
        self
    }

    /// Adds a module resolved from a registry. The bucket and the declared
    /// dependency keys are loaded on first use.
    pub fn add_remote_module<B, D>(
        mut self,
        module_key: ModuleKey,
        get_bucket: B,
        get_dep_module_keys: D,
        is_target: bool,
    ) -> Self
    where
        B: FnOnce() -> Result<Arc<dyn ReadBucket>> + Send + 'static,
        D: FnOnce() -> Result<Vec<ModuleKey>> + Send + 'static,
    {
        self.pending.push(ModuleInit {
            bucket: Arc::new(OnceFn::new(get_bucket)),
            bucket_id: String::new(),
            description: None,
            full_name: Some(module_key.full_name().clone()),
            commit_id: module_key.commit_id(),
            is_target,
            is_local: false,
            v1_buf_yaml: Arc::new(OnceFn::ready(None)),
            v1_buf_lock: Arc::new(OnceFn::ready(None)),
            dep_module_keys_b5: Arc::new(OnceFn::new(get_dep_module_keys)),
            target_paths: Vec::new(),
            target_exclude_paths: Vec::new(),
        });
        self
    }

    /// Adds a module whose content was already fetched from a registry.
    pub fn add_remote_module_data(mut self, module_data: ModuleData, is_target: bool) -> Self {
        let ModuleData {
            module_key,
            bucket,
            dep_module_keys,
            v1_buf_yaml,
            v1_buf_lock,
        } = module_data;
        self.pending.push(ModuleInit {
            bucket: Arc::new(OnceFn::ready(bucket)),
            bucket_id: String::new(),
            description: None,
            full_name: Some(module_key.full_name().clone()),
            commit_id: module_key.commit_id(),
            is_target,
            is_local: false,
            v1_buf_yaml: Arc::new(OnceFn::ready(v1_buf_yaml)),
            v1_buf_lock: Arc::new(OnceFn::ready(v1_buf_lock)),
            dep_module_keys_b5: Arc::new(OnceFn::ready(dep_module_keys)),
            target_paths: Vec::new(),
            target_exclude_paths: Vec::new(),
        });
        self
    }

    pub fn build(self) -> Result<ModuleSet> {
        let mut kept: Vec<ModuleInit> = Vec::with_capacity(self.pending.len());
        let mut full_name_to_index: HashMap<String, usize> = HashMap::new();
        for init in self.pending {
            let existing = init
                .full_name
                .as_ref()
                .and_then(|full_name| full_name_to_index.get(&full_name.to_string()))
                .copied();
            match existing {
                Some(index) => {
                    if let Some(init) = merge_duplicate(&mut kept[index], init)? {
                        // two local modules with one name, rejected below
                        kept.push(init);
                    }
                }
                None => {
                    if let Some(full_name) = &init.full_name {
                        full_name_to_index.insert(full_name.to_string(), kept.len());
                    }
                    kept.push(init);
                }
            }
        }
        let entries = kept
            .into_iter()
            .map(ModuleEntry::new)
            .collect::<Result<Vec<_>>>()?;
        let inner = ModuleSetInner::new(entries, self.import_parser)?;
        debug!("Built module set with {} modules", inner.entries.len());
        Ok(ModuleSet::from_inner(Arc::new(inner)))
    }
}

/// Resolves two modules sharing a full name. Returns the incoming module if
/// both are local and must be kept side by side.
fn merge_duplicate(existing: &mut ModuleInit, incoming: ModuleInit) -> Result<Option<ModuleInit>> {
    let full_name = incoming
        .full_name
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    match (existing.is_local, incoming.is_local) {
        (true, true) => Ok(Some(incoming)),
        (true, false) => {
            debug!("Dropping remote module {} in favor of local module", full_name);
            Ok(None)
        }
        (false, true) => {
            debug!("Dropping remote module {} in favor of local module", full_name);
            *existing = incoming;
            Ok(None)
        }
        (false, false) => {
            if existing.commit_id != incoming.commit_id {
                return Err(ModuleError::ConflictingCommits {
                    full_name,
                    first: existing.commit_id.simple().to_string(),
                    second: incoming.commit_id.simple().to_string(),
                });
            }
            existing.is_target |= incoming.is_target;
            Ok(None)
        }
    }
}
