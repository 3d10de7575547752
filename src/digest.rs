use std::{fmt::Display, str::FromStr};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{
    digest::{ExtendableOutput, Update, XofReader},
    Shake256,
};

use crate::{
    bucket::{ModuleReadBucket, ObjectData},
    error::{ModuleError, Result},
    model::ParseError,
};

/// Length in bytes of every digest value.
pub const DIGEST_LENGTH: usize = 64;

/// The generation of the module digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DigestType {
    /// Flat digest over the module's own files and original configuration files.
    #[serde(rename = "b4")]
    B4,
    /// Merkle digest over the module's own files and its dependencies' digests.
    #[serde(rename = "b5")]
    B5,
}

impl DigestType {
    pub const ALL: [DigestType; 2] = [DigestType::B4, DigestType::B5];

    fn tag(&self) -> &'static [u8] {
        match self {
            DigestType::B4 => b"b4",
            DigestType::B5 => b"b5",
        }
    }
}

impl Display for DigestType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DigestType::B4 => f.write_str("b4"),
            DigestType::B5 => f.write_str("b5"),
        }
    }
}

impl FromStr for DigestType {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "b4" => Ok(DigestType::B4),
            "b5" => Ok(DigestType::B5),
            _ => Err(ParseError::InvalidDigestType(value.to_string())),
        }
    }
}

/// A typed module digest. Two digests are equal iff type and value are equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    digest_type: DigestType,
    value: [u8; DIGEST_LENGTH],
}

impl Digest {
    pub fn new(digest_type: DigestType, value: &[u8]) -> Result<Digest, ParseError> {
        let value: [u8; DIGEST_LENGTH] = value.try_into().map_err(|_| {
            ParseError::InvalidDigest(
                hex::encode(value),
                format!("expected {} bytes, got {}", DIGEST_LENGTH, value.len()),
            )
        })?;
        Ok(Digest { digest_type, value })
    }

    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.digest_type, hex::encode(self.value))
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Digest({})", self)
    }
}

impl FromStr for Digest {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digest_type, value) = s
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidDigest(s.to_string(), "missing type".to_string()))?;
        let digest_type = digest_type.parse::<DigestType>()?;
        let value = hex::decode(value)
            .map_err(|e| ParseError::InvalidDigest(s.to_string(), e.to_string()))?;
        Digest::new(digest_type, &value)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Compares two digests, failing if they are of different generations.
pub fn digest_equal(a: &Digest, b: &Digest) -> Result<bool> {
    if a.digest_type != b.digest_type {
        return Err(ModuleError::DigestTypeMismatch {
            expected: a.digest_type,
            actual: b.digest_type,
        });
    }
    Ok(a.value == b.value)
}

/// Unambiguous binary encoding fed to SHAKE256: every variable-length field
/// is prefixed with its little-endian u64 length.
struct DigestWriter {
    digest_type: DigestType,
    hasher: Shake256,
}

impl DigestWriter {
    fn new(digest_type: DigestType) -> Self {
        let mut writer = DigestWriter {
            digest_type,
            hasher: Shake256::default(),
        };
        writer.write_bytes(digest_type.tag());
        writer
    }

    fn write_u64(&mut self, value: u64) {
        self.hasher.update(&value.to_le_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u64(bytes.len() as u64);
        self.hasher.update(bytes);
    }

    fn write_digest(&mut self, digest: &Digest) {
        self.write_bytes(digest.digest_type.tag());
        self.write_bytes(&digest.value);
    }

    fn write_files(&mut self, bucket: &ModuleReadBucket) -> Result<()> {
        let paths = bucket.file_paths()?;
        self.write_u64(paths.len() as u64);
        for path in paths.iter() {
            let data = bucket.get_file(path)?;
            self.write_bytes(path.as_bytes());
            self.write_bytes(&data);
        }
        Ok(())
    }

    fn write_object_data(&mut self, object_data: Option<&ObjectData>) {
        match object_data {
            Some(object_data) => {
                self.hasher.update(&[1]);
                self.write_bytes(object_data.name.as_bytes());
                self.write_bytes(&object_data.data);
            }
            None => self.hasher.update(&[0]),
        }
    }

    fn finish(self) -> Digest {
        let mut value = [0u8; DIGEST_LENGTH];
        self.hasher.finalize_xof().read(&mut value);
        Digest {
            digest_type: self.digest_type,
            value,
        }
    }
}

/// The legacy flat digest: own files plus the original configuration file
/// bytes, no dependency information.
pub(crate) fn b4_digest(
    bucket: &ModuleReadBucket,
    v1_buf_yaml: Option<&ObjectData>,
    v1_buf_lock: Option<&ObjectData>,
) -> Result<Digest> {
    let mut writer = DigestWriter::new(DigestType::B4);
    writer.write_files(bucket)?;
    writer.write_object_data(v1_buf_yaml);
    writer.write_object_data(v1_buf_lock);
    Ok(writer.finish())
}

/// The Merkle digest: own files plus the digests of the pruned dependencies.
///
/// `dep_digests` must already be ordered by the dependencies' OpaqueID.
pub(crate) fn b5_digest(bucket: &ModuleReadBucket, dep_digests: &[Digest]) -> Result<Digest> {
    let mut writer = DigestWriter::new(DigestType::B5);
    writer.write_files(bucket)?;
    writer.write_u64(dep_digests.len() as u64);
    for dep_digest in dep_digests {
        if dep_digest.digest_type != DigestType::B5 {
            return Err(ModuleError::DigestTypeMismatch {
                expected: DigestType::B5,
                actual: dep_digest.digest_type,
            });
        }
        writer.write_digest(dep_digest);
    }
    Ok(writer.finish())
}
