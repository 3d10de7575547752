use std::sync::Arc;

use thiserror::Error;

use crate::{digest::DigestType, provider::ProviderError};

pub type Result<T, E = ModuleError> = std::result::Result<T, E>;

/// Errors produced by the module core.
///
/// Memoized computations hand the same error to every caller, so this type is
/// `Clone`; underlying IO errors are shared behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum ModuleError {
    /// An invariant of this crate or of its caller was violated. Never expected
    /// with correct usage.
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("File {path} was not found")]
    FileNotFound { path: String },
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("File {path} is not valid UTF-8")]
    InvalidUtf8 { path: String },
    #[error("Module {module} contains no .proto files")]
    NoProtoFiles { module: String },
    #[error("{module}: import \"{import}\" in {file} was not found in any module")]
    ImportNotFound {
        module: String,
        file: String,
        import: String,
    },
    #[error("File {path} is contained in multiple modules: {}", modules.join(", "))]
    MultipleModulesForPath { path: String, modules: Vec<String> },
    #[error("Dependency cycle detected between {module} and {dependency}")]
    DependencyCycle { module: String, dependency: String },
    #[error("Module {0} was added to the module set more than once")]
    DuplicateOpaqueId(String),
    #[error("Bucket {0} was added to the module set more than once")]
    DuplicateBucketId(String),
    #[error("Module {0} is not contained in the module set")]
    UnknownOpaqueId(String),
    #[error("Module {full_name} was resolved at two different commits: {first} and {second}")]
    ConflictingCommits {
        full_name: String,
        first: String,
        second: String,
    },
    #[error("Different digest types detected where the same digest type must be used: {expected}, {actual}")]
    DigestTypeMismatch {
        expected: DigestType,
        actual: DigestType,
    },
    #[error("Module {0} has no name, but a name is required")]
    FullNameRequired(String),
    #[error("Module {0} has no commit, but a commit is required")]
    CommitIdRequired(String),
    #[error("Invalid module key: {0}")]
    InvalidModuleKey(String),
    #[error("Dependency {module} does not match its content at commit {commit}, push it first")]
    DependencyNotPushed { module: String, commit: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ModuleError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ModuleError::Internal(message.into())
    }

    pub(crate) fn io(path: impl Into<String>, error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            ModuleError::FileNotFound { path: path.into() }
        } else {
            ModuleError::Io {
                path: path.into(),
                source: Arc::new(error),
            }
        }
    }

    /// True if this error denotes a defect rather than an ordinary failure.
    pub fn is_internal(&self) -> bool {
        matches!(self, ModuleError::Internal(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ModuleError::FileNotFound { .. } | ModuleError::Provider(ProviderError::NotFound(_))
        )
    }
}
