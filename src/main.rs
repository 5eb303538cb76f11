use std::path::PathBuf;

use clap::Parser;
use log::info;
use tokio::signal;

use wofs::policy::PolicyEngine;
use wofs::server::mount_write_only;
use wofs::writeonly::new_write_only_fs;

/// From the mount point, clients can only create directories and write
/// new files. Reads fail with permission denied and directories always
/// list empty; nothing already stored can be changed or removed.
#[derive(Parser, Debug)]
#[command(author, version, about = "Write-only filesystem with naming restrictions")]
struct Args {
    /// Path to mount point
    #[arg(long)]
    mountpoint: PathBuf,
    /// Directory where the files will be written
    #[arg(long, default_value = "/var/wofs")]
    storage_dir: PathBuf,
    /// Directory containing allow.rules and deny.rules
    #[arg(long, default_value = "/etc/wofs")]
    conf_dir: PathBuf,
    /// Use privileged mount instead of unprivileged (default false)
    #[arg(long, default_value_t = false)]
    not_unprivileged: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    info!("configuration directory: {}", args.conf_dir.display());
    info!("storage directory: {}", args.storage_dir.display());

    let policy = match PolicyEngine::load(&args.conf_dir) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("failed to load naming rules: {e}");
            std::process::exit(1);
        }
    };

    let fs = match new_write_only_fs(&args.storage_dir, policy).await {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!(
                "storage directory {} does not exist or is not a directory: {e}",
                args.storage_dir.display()
            );
            std::process::exit(1);
        }
    };

    let mut mount_handle = match mount_write_only(fs, &args.mountpoint, !args.not_unprivileged).await
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("mount failed: {e}");
            std::process::exit(1);
        }
    };

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => res.unwrap(),
        _ = signal::ctrl_c() => {
            mount_handle.unmount().await.unwrap()
        }
    }
}
