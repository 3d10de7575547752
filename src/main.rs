use std::process::exit;

use clap::Parser;
use log::error;

use protomodule::{
    cli::{
        args::{CliArgs, Command},
        command_handlers,
    },
    config::ProtomoduleConfig,
};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("{}", e);
        exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli_args: CliArgs = CliArgs::parse();
    let config = ProtomoduleConfig::load()?;

    let root = cli_args.root;
    let workspace_location = cli_args
        .workspace_location
        .unwrap_or(config.workspace_file);
    let module_set = command_handlers::load_module_set(&root, &workspace_location)?;

    match cli_args.cmd {
        Command::Digest {
            digest_type,
            target,
        } => {
            let digest_type = digest_type.unwrap_or(config.digest_type);
            command_handlers::do_digest(module_set, digest_type, &target).await?;
            Ok(())
        }
        Command::Deps { module, direct } => {
            tokio::task::spawn_blocking(move || {
                command_handlers::do_deps(&module_set, &module, direct)
            })
            .await?
        }
        Command::Lock { locked } => {
            let lock_file_path = root.join(cli_args.lockfile_location.unwrap_or(config.lock_file));
            let digest_type = config.digest_type;
            tokio::task::spawn_blocking(move || {
                command_handlers::do_lock(&module_set, digest_type, &lock_file_path, locked)
            })
            .await??;
            Ok(())
        }
    }
}
