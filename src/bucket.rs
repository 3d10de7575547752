use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::trace;

use crate::{
    error::{ModuleError, Result},
    sync::{OnceFn, OnceValue},
};

/// Read-only storage of named byte blobs, addressed by `/`-separated relative
/// paths. Content must not change for the lifetime of the modules built on it.
pub trait ReadBucket: Send + Sync {
    /// Fails with [`ModuleError::FileNotFound`] if the path does not exist.
    fn get_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Calls `f` with the path of every object in the bucket.
    fn walk_paths(&self, f: &mut dyn FnMut(&str) -> Result<()>) -> Result<()>;
}

/// Raw content of an original configuration file, kept only for B4 digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectData {
    pub name: String,
    pub data: Vec<u8>,
}

impl ObjectData {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        ObjectData {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryBucket {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(path, data);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), data.into());
    }
}

impl<P: Into<String>, D: Into<Vec<u8>>> FromIterator<(P, D)> for MemoryBucket {
    fn from_iter<T: IntoIterator<Item = (P, D)>>(iter: T) -> Self {
        MemoryBucket {
            files: iter
                .into_iter()
                .map(|(path, data)| (path.into(), data.into()))
                .collect(),
        }
    }
}

impl ReadBucket for MemoryBucket {
    fn get_file(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ModuleError::FileNotFound {
                path: path.to_string(),
            })
    }

    fn walk_paths(&self, f: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
        for path in self.files.keys() {
            f(path)?;
        }
        Ok(())
    }
}

/// A bucket backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DirBucket {
    root: PathBuf,
}

impl DirBucket {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirBucket { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk_dir(&self, dir: &Path, f: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
        let mut entries = std::fs::read_dir(dir)
            .map_err(|e| ModuleError::io(dir.display().to_string(), e))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ModuleError::io(dir.display().to_string(), e))?;
        entries.sort();
        for path in entries {
            if path.is_dir() {
                self.walk_dir(&path, f)?;
            } else if path.is_file() {
                let relative = path.strip_prefix(&self.root).map_err(|_| {
                    ModuleError::internal(format!(
                        "{} is not under {}",
                        path.display(),
                        self.root.display()
                    ))
                })?;
                let relative = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                f(&relative)?;
            }
        }
        Ok(())
    }
}

impl ReadBucket for DirBucket {
    fn get_file(&self, path: &str) -> Result<Vec<u8>> {
        let normalized = normalize_path(path).map_err(|_| ModuleError::FileNotFound {
            path: path.to_string(),
        })?;
        std::fs::read(self.root.join(&normalized)).map_err(|e| ModuleError::io(path, e))
    }

    fn walk_paths(&self, f: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
        if !self.root.is_dir() {
            return Err(ModuleError::FileNotFound {
                path: self.root.display().to_string(),
            });
        }
        self.walk_dir(&self.root, f)
    }
}

/// Normalizes a relative `/`-separated path: drops `.` and empty components
/// and resolves `..`. Absolute paths and paths escaping the root are rejected.
pub fn normalize_path(path: &str) -> Result<String, String> {
    if path.starts_with('/') {
        return Err(format!("{} is an absolute path", path));
    }
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if components.pop().is_none() {
                    return Err(format!("{} is outside the context directory", path));
                }
            }
            component => components.push(component),
        }
    }
    Ok(components.join("/"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileType {
    Proto,
    Doc,
    License,
}

impl FileType {
    /// The type of a module file, or `None` if the path is not part of a module.
    pub fn for_path(path: &str) -> Option<FileType> {
        if path.ends_with(".proto") {
            Some(FileType::Proto)
        } else {
            match path {
                "buf.md" | "README.md" | "README.markdown" => Some(FileType::Doc),
                "LICENSE" => Some(FileType::License),
                _ => None,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub file_type: FileType,
    /// False for every file of a non-target module.
    pub is_target_file: bool,
}

type FileIndex = Arc<BTreeMap<String, FileType>>;

/// A module's view of its bucket: only module files (.proto sources,
/// documentation and license), each marked as target or not.
#[derive(Clone)]
pub struct ModuleReadBucket {
    description: String,
    bucket: Arc<OnceFn<Arc<dyn ReadBucket>>>,
    files: Arc<OnceValue<FileIndex>>,
    is_target: bool,
    target_paths: Arc<[String]>,
    target_exclude_paths: Arc<[String]>,
}

impl ModuleReadBucket {
    pub(crate) fn new(
        description: String,
        bucket: Arc<OnceFn<Arc<dyn ReadBucket>>>,
        is_target: bool,
        target_paths: Vec<String>,
        target_exclude_paths: Vec<String>,
    ) -> Result<Self> {
        let normalize = |paths: Vec<String>| {
            paths
                .iter()
                .map(|path| normalize_path(path).map_err(ModuleError::Internal))
                .collect::<Result<Vec<_>>>()
        };
        Ok(ModuleReadBucket {
            description,
            bucket,
            files: Arc::new(OnceValue::new()),
            is_target,
            target_paths: normalize(target_paths)?.into(),
            target_exclude_paths: normalize(target_exclude_paths)?.into(),
        })
    }

    /// A copy with a different target flag, sharing the underlying bucket and
    /// the file index.
    pub(crate) fn with_is_target(&self, is_target: bool) -> Self {
        ModuleReadBucket {
            is_target,
            ..self.clone()
        }
    }

    pub fn walk_file_infos(&self, f: &mut dyn FnMut(&FileInfo) -> Result<()>) -> Result<()> {
        for (path, file_type) in self.file_index()?.iter() {
            f(&self.file_info(path, *file_type))?;
        }
        Ok(())
    }

    /// All module files in ascending path order.
    pub fn file_infos(&self) -> Result<Vec<FileInfo>> {
        Ok(self
            .file_index()?
            .iter()
            .map(|(path, file_type)| self.file_info(path, *file_type))
            .collect())
    }

    pub fn target_file_infos(&self) -> Result<Vec<FileInfo>> {
        Ok(self
            .file_infos()?
            .into_iter()
            .filter(|file_info| file_info.is_target_file)
            .collect())
    }

    pub fn file_paths(&self) -> Result<Vec<String>> {
        Ok(self.file_index()?.keys().cloned().collect())
    }

    pub fn proto_file_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .file_index()?
            .iter()
            .filter(|(_, file_type)| **file_type == FileType::Proto)
            .map(|(path, _)| path.clone())
            .collect())
    }

    pub fn stat_file_info(&self, path: &str) -> Result<FileInfo> {
        self.file_index()?
            .get(path)
            .map(|file_type| self.file_info(path, *file_type))
            .ok_or_else(|| ModuleError::FileNotFound {
                path: path.to_string(),
            })
    }

    pub fn contains_proto_file(&self, path: &str) -> Result<bool> {
        Ok(self.file_index()?.get(path) == Some(&FileType::Proto))
    }

    pub fn get_file(&self, path: &str) -> Result<Vec<u8>> {
        if !self.file_index()?.contains_key(path) {
            return Err(ModuleError::FileNotFound {
                path: path.to_string(),
            });
        }
        self.bucket.call()?.get_file(path)
    }

    fn file_index(&self) -> Result<FileIndex> {
        self.files.get_or_compute(|| {
            let bucket = self.bucket.call()?;
            let mut files = BTreeMap::new();
            bucket.walk_paths(&mut |path| {
                match FileType::for_path(path) {
                    Some(file_type) => {
                        files.insert(path.to_string(), file_type);
                    }
                    None => trace!("Ignoring non-module file {} in {}", path, self.description),
                }
                Ok(())
            })?;
            if !files.values().any(|file_type| *file_type == FileType::Proto) {
                return Err(ModuleError::NoProtoFiles {
                    module: self.description.clone(),
                });
            }
            Ok(Arc::new(files))
        })
    }

    fn file_info(&self, path: &str, file_type: FileType) -> FileInfo {
        FileInfo {
            path: path.to_string(),
            file_type,
            is_target_file: self.is_target_path(path),
        }
    }

    fn is_target_path(&self, path: &str) -> bool {
        if !self.is_target {
            return false;
        }
        if self
            .target_exclude_paths
            .iter()
            .any(|exclude| path_matches(path, exclude))
        {
            return false;
        }
        self.target_paths.is_empty()
            || self
                .target_paths
                .iter()
                .any(|target| path_matches(path, target))
    }
}

fn path_matches(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}
