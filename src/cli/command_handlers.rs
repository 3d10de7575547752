use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail};
use log::{debug, info};

use crate::{
    bucket::{DirBucket, ObjectData, ReadBucket},
    digest::{Digest, DigestType},
    error::{ModuleError, Result},
    model::{lock::LockFile, workspace::WorkspaceDescriptor},
    module::{module_to_module_key, Module},
    module_set::{LocalModuleOptions, ModuleSet, ModuleSetBuilder},
};

const V1_BUF_YAML_FILE_NAME: &str = "buf.yaml";
const V1_BUF_LOCK_FILE_NAME: &str = "buf.lock";

/// Builds the module set of a workspace. Every module of the descriptor is a
/// target and is read from its directory on first use.
pub fn load_module_set(root: &Path, workspace_file_name: &Path) -> anyhow::Result<ModuleSet> {
    let descriptor = WorkspaceDescriptor::from_file(&root.join(workspace_file_name))?;
    debug!("Loaded workspace with {} modules", descriptor.modules.len());

    let mut builder = ModuleSetBuilder::new();
    for module in &descriptor.modules {
        let module_root = root.join(&module.path);
        let bucket: Arc<dyn ReadBucket> = Arc::new(DirBucket::new(&module_root));
        let mut options = LocalModuleOptions::new()
            .target(true)
            .target_paths(module.includes.clone())
            .target_exclude_paths(module.excludes.clone())
            .v1_buf_yaml_with(read_object_data(&module_root, V1_BUF_YAML_FILE_NAME))
            .v1_buf_lock_with(read_object_data(&module_root, V1_BUF_LOCK_FILE_NAME));
        if let Some(name) = &module.name {
            options = options.full_name(name.clone());
        }
        if let Some(commit_id) = module.commit_id()? {
            options = options.commit_id(commit_id);
        }
        if let Some(description) = &module.description {
            options = options.description(description.clone());
        }
        builder = builder.add_local_module(bucket, module.bucket_id()?, options);
    }
    Ok(builder.build()?)
}

fn read_object_data(
    module_root: &Path,
    name: &'static str,
) -> impl FnOnce() -> Result<Option<ObjectData>> + Send + 'static {
    let path: PathBuf = module_root.join(name);
    move || match std::fs::read(&path) {
        Ok(data) => Ok(Some(ObjectData::new(name, data))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ModuleError::io(path.display().to_string(), e)),
    }
}

/// Finds a module by OpaqueID (full name or bucket id) or by bucket id.
fn find_module(module_set: &ModuleSet, reference: &str) -> anyhow::Result<Module> {
    module_set
        .get_module_for_opaque_id(reference)
        .or_else(|| module_set.get_module_for_bucket_id(reference))
        .ok_or_else(|| anyhow!("Module {} is not part of the workspace", reference))
}

/// Handler to digest command
/// Computes the digests of the target modules in parallel
pub async fn do_digest(
    module_set: ModuleSet,
    digest_type: DigestType,
    targets: &[String],
) -> anyhow::Result<Vec<(String, Digest)>> {
    let module_set = if targets.is_empty() {
        module_set
    } else {
        let opaque_ids = targets
            .iter()
            .map(|target| find_module(&module_set, target).map(|m| m.opaque_id().to_string()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        module_set.with_target_opaque_ids(&opaque_ids)?
    };

    let handles = module_set
        .target_modules()
        .into_iter()
        .map(|module| {
            tokio::task::spawn_blocking(move || {
                let digest = module.digest(digest_type)?;
                Ok::<_, ModuleError>((module.description().to_string(), digest))
            })
        })
        .collect::<Vec<_>>();

    let mut digests = Vec::with_capacity(handles.len());
    for handle in handles {
        digests.push(handle.await??);
    }
    for (description, digest) in &digests {
        println!("{} {}", digest, description);
    }
    Ok(digests)
}

/// Handler to deps command
pub fn do_deps(module_set: &ModuleSet, reference: &str, direct_only: bool) -> anyhow::Result<()> {
    let module = find_module(module_set, reference)?;
    for module_dep in module.module_deps()? {
        if direct_only && !module_dep.is_direct() {
            continue;
        }
        let kind = if module_dep.is_direct() {
            "direct"
        } else {
            "transitive"
        };
        println!("{} {}", module_dep.opaque_id(), kind);
    }
    Ok(())
}

/// Handler to lock command
/// Pins every module that has a name and a commit
pub fn do_lock(
    module_set: &ModuleSet,
    digest_type: DigestType,
    lock_file_path: &Path,
    locked: bool,
) -> anyhow::Result<LockFile> {
    let module_keys = module_set
        .modules()
        .iter()
        .filter(|module| module.full_name().is_some() && !module.commit_id().is_nil())
        .map(|module| module_to_module_key(module, digest_type))
        .collect::<Result<Vec<_>>>()?;
    let lockfile = LockFile::from_module_keys(&module_keys)?;

    debug!("Generated lockfile: {:?}", lockfile);

    let old_lock = if lock_file_path.exists() {
        Some(LockFile::from_file(lock_file_path)?)
    } else {
        None
    };

    if old_lock.as_ref() == Some(&lockfile) {
        debug!("Lockfile is up to date");
    } else if locked {
        bail!("Lock file {} is out of date", lock_file_path.display());
    } else {
        std::fs::write(lock_file_path, lockfile.to_string()?)?;
        info!("Wrote lockfile to {}", lock_file_path.display());
    }

    Ok(lockfile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WORKSPACE: &str = r#"
[[modules]]
path = "petapis"
name = "buf.build/acme/petapis"

[[modules]]
path = "money"
name = "buf.build/acme/money"
commit = "6f1c9b1e2d1f4a478d435f0e1c0b9d2a"
"#;

    fn write_workspace(root: &Path) {
        std::fs::create_dir_all(root.join("petapis/acme/pet/v1")).unwrap();
        std::fs::create_dir_all(root.join("money/acme/money/v1")).unwrap();
        std::fs::write(root.join("protomodule.toml"), WORKSPACE).unwrap();
        std::fs::write(
            root.join("petapis/acme/pet/v1/pet.proto"),
            "syntax = \"proto3\";\nimport \"acme/money/v1/money.proto\";\n",
        )
        .unwrap();
        std::fs::write(root.join("petapis/buf.yaml"), "version: v1\n").unwrap();
        std::fs::write(
            root.join("money/acme/money/v1/money.proto"),
            "syntax = \"proto3\";\n",
        )
        .unwrap();
    }

    #[test]
    fn load_workspace() {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(dir.path());
        let module_set = load_module_set(dir.path(), Path::new("protomodule.toml")).unwrap();

        assert_eq!(module_set.target_modules().len(), 2);
        let petapis = find_module(&module_set, "petapis").unwrap();
        assert_eq!(petapis.opaque_id(), "buf.build/acme/petapis");
        assert_eq!(
            petapis.v1_buf_yaml_object_data().unwrap(),
            Some(ObjectData::new("buf.yaml", "version: v1\n"))
        );
        assert_eq!(petapis.v1_buf_lock_object_data().unwrap(), None);
        let deps = petapis.module_deps().unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].opaque_id(), "buf.build/acme/money");
        assert!(find_module(&module_set, "missing").is_err());
    }

    #[test]
    fn same_directory_listed_twice() {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(dir.path());
        std::fs::write(
            dir.path().join("protomodule.toml"),
            r#"
[[modules]]
path = "money"
name = "buf.build/acme/money"

[[modules]]
path = "./money"
name = "buf.build/acme/cash"
"#,
        )
        .unwrap();
        let error = load_module_set(dir.path(), Path::new("protomodule.toml")).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ModuleError>(),
            Some(ModuleError::DuplicateBucketId(bucket_id)) if bucket_id == "money"
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn digest_targets() {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(dir.path());
        let module_set = load_module_set(dir.path(), Path::new("protomodule.toml")).unwrap();
        let money = find_module(&module_set, "money").unwrap();
        let expected = money.digest(DigestType::B5).unwrap();

        let digests = do_digest(module_set, DigestType::B5, &["money".to_string()])
            .await
            .unwrap();
        assert_eq!(digests, vec![("buf.build/acme/money".to_string(), expected)]);
    }

    #[test]
    fn lock_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(dir.path());
        let module_set = load_module_set(dir.path(), Path::new("protomodule.toml")).unwrap();
        let lock_file_path = dir.path().join("protomodule.lock");

        assert!(do_lock(&module_set, DigestType::B5, &lock_file_path, true).is_err());

        let lockfile = do_lock(&module_set, DigestType::B5, &lock_file_path, false).unwrap();
        assert_eq!(lockfile.modules.len(), 1);
        assert_eq!(lockfile.modules[0].name.to_string(), "buf.build/acme/money");
        assert_eq!(LockFile::from_file(&lock_file_path).unwrap(), lockfile);

        let again = do_lock(&module_set, DigestType::B5, &lock_file_path, true).unwrap();
        assert_eq!(again, lockfile);
    }
}
