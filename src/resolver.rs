use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use log::{debug, trace};

use crate::{
    error::{ModuleError, Result},
    module_set::ModuleSetInner,
};

/// Files shipped with every protobuf compiler. Importing one does not make
/// the importing module depend on anything unless a module provides it.
const WELL_KNOWN_TYPE_PATHS: &[&str] = &[
    "google/protobuf/any.proto",
    "google/protobuf/api.proto",
    "google/protobuf/compiler/plugin.proto",
    "google/protobuf/descriptor.proto",
    "google/protobuf/duration.proto",
    "google/protobuf/empty.proto",
    "google/protobuf/field_mask.proto",
    "google/protobuf/source_context.proto",
    "google/protobuf/struct.proto",
    "google/protobuf/timestamp.proto",
    "google/protobuf/type.proto",
    "google/protobuf/wrappers.proto",
];

pub(crate) fn is_well_known_type(path: &str) -> bool {
    WELL_KNOWN_TYPE_PATHS.contains(&path)
}

/// Walks import statements breadth-first from the module at `root` and
/// returns every module reached, flagged as direct when one of the root's own
/// files imports it. Modules that are never reached are pruned. The result is
/// sorted by OpaqueID.
///
/// The walk never consults other modules' memoized dependencies, so resolving
/// a cycle terminates instead of waiting on itself.
pub(crate) fn module_dep_indices(set: &ModuleSetInner, root: usize) -> Result<Vec<(usize, bool)>> {
    let mut deps: BTreeMap<usize, bool> = BTreeMap::new();
    let mut visited: HashSet<usize> = HashSet::from([root]);
    let mut queue = VecDeque::new();

    for dep in imported_modules(set, root)? {
        deps.insert(dep, true);
        if visited.insert(dep) {
            queue.push_back(dep);
        }
    }
    while let Some(index) = queue.pop_front() {
        for dep in imported_modules(set, index)? {
            if visited.insert(dep) {
                deps.insert(dep, false);
                queue.push_back(dep);
            }
        }
    }

    let mut deps = deps.into_iter().collect::<Vec<_>>();
    deps.sort_by(|(a, _), (b, _)| set.entries[*a].opaque_id().cmp(set.entries[*b].opaque_id()));
    debug!(
        "Resolved {} dependencies for {}: {:?}",
        deps.len(),
        set.entries[root].description(),
        deps.iter()
            .map(|(index, _)| set.entries[*index].opaque_id())
            .collect::<Vec<_>>()
    );
    Ok(deps)
}

/// Modules other than `index` providing a file imported by one of the
/// .proto files of the module at `index`.
fn imported_modules(set: &ModuleSetInner, index: usize) -> Result<BTreeSet<usize>> {
    let entry = &set.entries[index];
    let mut modules = BTreeSet::new();
    for path in entry.read_bucket().proto_file_paths()? {
        for import in set.imports_for_file(index, &path)?.iter() {
            match set.module_index_for_file_path(import)? {
                Some(dep) if dep != index => {
                    modules.insert(dep);
                }
                Some(_) => {}
                None if is_well_known_type(import) => {
                    trace!("{} imports well-known type {}", path, import)
                }
                None => {
                    return Err(ModuleError::ImportNotFound {
                        module: entry.description().to_string(),
                        file: path.clone(),
                        import: import.clone(),
                    })
                }
            }
        }
    }
    Ok(modules)
}
