use std::{fmt::Display, sync::Arc};

use uuid::Uuid;

use crate::{
    digest::{Digest, DigestType},
    error::{ModuleError, Result},
    model::FullName,
    sync::OnceFn,
};

/// A fully resolved reference to a module at a commit. The digest is loaded
/// lazily and at most once; construction does not validate it.
#[derive(Clone)]
pub struct ModuleKey {
    inner: Arc<ModuleKeyInner>,
}

struct ModuleKeyInner {
    full_name: FullName,
    commit_id: Uuid,
    digest: OnceFn<Digest>,
}

impl ModuleKey {
    pub fn new<F>(full_name: FullName, commit_id: Uuid, get_digest: F) -> Result<ModuleKey>
    where
        F: FnOnce() -> Result<Digest> + Send + 'static,
    {
        Self::with_once_fn(full_name, commit_id, OnceFn::new(get_digest))
    }

    /// A key whose digest is already known.
    pub fn with_digest(full_name: FullName, commit_id: Uuid, digest: Digest) -> Result<ModuleKey> {
        Self::with_once_fn(full_name, commit_id, OnceFn::ready(digest))
    }

    fn with_once_fn(
        full_name: FullName,
        commit_id: Uuid,
        digest: OnceFn<Digest>,
    ) -> Result<ModuleKey> {
        if commit_id.is_nil() {
            return Err(ModuleError::InvalidModuleKey(format!(
                "empty commit id when constructing a key for {}",
                full_name
            )));
        }
        Ok(ModuleKey {
            inner: Arc::new(ModuleKeyInner {
                full_name,
                commit_id,
                digest,
            }),
        })
    }

    pub fn full_name(&self) -> &FullName {
        &self.inner.full_name
    }

    pub fn commit_id(&self) -> Uuid {
        self.inner.commit_id
    }

    pub fn digest(&self) -> Result<Digest> {
        self.inner.digest.call()
    }
}

impl Display for ModuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            self.inner.full_name,
            self.inner.commit_id.simple()
        )
    }
}

impl std::fmt::Debug for ModuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ModuleKey({})", self)
    }
}

/// The single digest type shared by all keys.
///
/// Fails on an empty slice (a caller defect) and when types differ.
pub fn unique_digest_type_for_module_keys(module_keys: &[ModuleKey]) -> Result<DigestType> {
    let (first, rest) = module_keys.split_first().ok_or_else(|| {
        ModuleError::internal("empty module keys passed to unique_digest_type_for_module_keys")
    })?;
    let digest_type = first.digest()?.digest_type();
    for module_key in rest {
        let other = module_key.digest()?.digest_type();
        if other != digest_type {
            return Err(ModuleError::DigestTypeMismatch {
                expected: digest_type,
                actual: other,
            });
        }
    }
    Ok(digest_type)
}

/// Identifies a commit on a registry, independent of the module name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitKey {
    registry: String,
    commit_id: Uuid,
    digest_type: DigestType,
}

impl CommitKey {
    pub fn new(registry: impl Into<String>, commit_id: Uuid, digest_type: DigestType) -> Result<Self> {
        let registry = registry.into();
        if registry.is_empty() {
            return Err(ModuleError::InvalidModuleKey(
                "empty registry when constructing a commit key".to_string(),
            ));
        }
        if commit_id.is_nil() {
            return Err(ModuleError::InvalidModuleKey(
                "empty commit id when constructing a commit key".to_string(),
            ));
        }
        Ok(CommitKey {
            registry,
            commit_id,
            digest_type,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn commit_id(&self) -> Uuid {
        self.commit_id
    }

    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }
}

impl Display for CommitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.registry, self.commit_id.simple())
    }
}

/// Drops the module name from a key. Loads the digest to learn its type.
pub fn module_key_to_commit_key(module_key: &ModuleKey) -> Result<CommitKey> {
    let digest = module_key.digest()?;
    CommitKey::new(
        module_key.full_name().registry(),
        module_key.commit_id(),
        digest.digest_type(),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::digest::DIGEST_LENGTH;
    use pretty_assertions::assert_eq;

    fn full_name() -> FullName {
        FullName::parse("buf.build/acme/weather").unwrap()
    }

    fn digest(digest_type: DigestType, byte: u8) -> Digest {
        Digest::new(digest_type, &[byte; DIGEST_LENGTH]).unwrap()
    }

    #[test]
    fn nil_commit_is_rejected_eagerly() {
        let called = Arc::new(AtomicUsize::new(0));
        let counted = called.clone();
        let result = ModuleKey::new(full_name(), Uuid::nil(), move || {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(digest(DigestType::B5, 1))
        });
        assert!(matches!(result, Err(ModuleError::InvalidModuleKey(_))));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn digest_is_lazy_and_memoized() {
        let called = Arc::new(AtomicUsize::new(0));
        let counted = called.clone();
        let key = ModuleKey::new(full_name(), Uuid::new_v4(), move || {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(digest(DigestType::B5, 1))
        })
        .unwrap();
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert_eq!(key.digest().unwrap(), digest(DigestType::B5, 1));
        assert_eq!(key.clone().digest().unwrap(), digest(DigestType::B5, 1));
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn display_uses_dashless_commit() {
        let commit_id = Uuid::parse_str("6f1c9b1e-2d1f-4a47-8d43-5f0e1c0b9d2a").unwrap();
        let key = ModuleKey::with_digest(full_name(), commit_id, digest(DigestType::B5, 1)).unwrap();
        assert_eq!(
            key.to_string(),
            "buf.build/acme/weather:6f1c9b1e2d1f4a478d435f0e1c0b9d2a"
        );
    }

    #[test]
    fn unique_digest_type() {
        let b5 = ModuleKey::with_digest(full_name(), Uuid::new_v4(), digest(DigestType::B5, 1)).unwrap();
        let other_b5 = ModuleKey::with_digest(
            FullName::parse("buf.build/acme/other").unwrap(),
            Uuid::new_v4(),
            digest(DigestType::B5, 2),
        )
        .unwrap();
        let b4 = ModuleKey::with_digest(full_name(), Uuid::new_v4(), digest(DigestType::B4, 1)).unwrap();

        assert_eq!(
            unique_digest_type_for_module_keys(&[b5.clone(), other_b5]).unwrap(),
            DigestType::B5
        );
        assert!(matches!(
            unique_digest_type_for_module_keys(&[b5, b4]),
            Err(ModuleError::DigestTypeMismatch { .. })
        ));
        assert!(unique_digest_type_for_module_keys(&[])
            .unwrap_err()
            .is_internal());
    }

    #[test]
    fn commit_key_from_module_key() {
        let commit_id = Uuid::new_v4();
        let key = ModuleKey::with_digest(full_name(), commit_id, digest(DigestType::B4, 3)).unwrap();
        let commit_key = module_key_to_commit_key(&key).unwrap();
        assert_eq!(commit_key.registry(), "buf.build");
        assert_eq!(commit_key.commit_id(), commit_id);
        assert_eq!(commit_key.digest_type(), DigestType::B4);
    }
}
