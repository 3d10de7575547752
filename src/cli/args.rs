use std::path::PathBuf;

use clap::Parser;

use crate::digest::DigestType;

/// Module digests and pruned dependency resolution for Protocol Buffers workspaces.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Workspace root directory
    #[clap(short, long, default_value = ".")]
    pub root: PathBuf,
    /// Workspace descriptor, relative to the root. Defaults to PROTOMODULE_WORKSPACE_FILE or protomodule.toml
    #[clap(short, long)]
    pub workspace_location: Option<PathBuf>,
    /// Lock file, relative to the root. Defaults to PROTOMODULE_LOCK_FILE or protomodule.lock
    #[clap(short, long)]
    pub lockfile_location: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub enum Command {
    ///Prints the digest of every target module
    Digest {
        /// b4 or b5. Defaults to PROTOMODULE_DIGEST_TYPE or b5
        #[clap(short, long)]
        digest_type: Option<DigestType>,
        /// Restricts targets to these modules, by name or path
        #[clap(short, long)]
        target: Vec<String>,
    },
    ///Lists the dependencies of a module that its files actually import
    Deps {
        /// Module name or path
        module: String,
        #[clap(long)]
        direct: bool,
    },
    ///Pins every named module that has a commit in the lock file
    Lock {
        /// Fails instead of writing if the lock file is out of date
        #[clap(long)]
        locked: bool,
    },
}
