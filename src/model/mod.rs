use thiserror::Error;

pub mod full_name;
pub mod lock;
pub mod workspace;

pub use full_name::FullName;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading configuration toml: {0}")]
    IO(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Missing TOML key `{0}` while parsing")]
    MissingKey(String),
    #[error("Missing module name component `{0}` in string `{1}`")]
    MissingNameComponent(String, String),
    #[error("Invalid digest type `{0}`, expected b4 or b5")]
    InvalidDigestType(String),
    #[error("Invalid digest `{0}`: {1}")]
    InvalidDigest(String, String),
    #[error("Invalid module path: {0}")]
    InvalidPath(String),
    #[error("Invalid commit id `{0}`")]
    InvalidCommitId(String),
    #[error("Invalid module key: {0}")]
    InvalidModuleKey(String),
    #[error("Unsupported lock file version {0}")]
    UnsupportedLockFileVersion(toml::Value),
    #[error("Lock file has no version")]
    MissingLockFileVersion,
}
