pub mod bucket;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod imports;
pub mod model;
pub mod module;
pub mod module_key;
pub mod module_set;
pub mod provider;
pub mod sync;

mod resolver;

pub use digest::{Digest, DigestType};
pub use error::{ModuleError, Result};
pub use module::{Module, ModuleDep};
pub use module_key::{CommitKey, ModuleKey};
pub use module_set::{LocalModuleOptions, ModuleSet, ModuleSetBuilder};
