//! flatcryptfs - Encrypted in-memory flat filesystem
//!
//! Usage:
//!   flatcryptfs [OPTIONS] <MOUNT_POINT>

use clap::Parser;
use flatcryptfs::{
    config::{Config, LoggingConfig},
    crypto::{Cipher, KeyStore},
    fs::{EncryptedFs, FlatCryptFs},
    Error, Result,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flatcryptfs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Encrypted in-memory flat filesystem")]
struct Cli {
    /// Mount point directory
    mount_point: PathBuf,

    /// Configuration file path (defaults to ~/.config/flatcryptfs/config.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Key record location, overriding the configuration
    #[arg(short, long)]
    key_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,
}

fn main() {
    let cli = Cli::parse();

    let config = load_config(&cli);

    // Log with whatever settings are available so config errors are reported too
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    if let Err(e) = init_logging(&logging, cli.verbose) {
        eprintln!("Failed to set up logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = config.and_then(|config| cmd_mount(&cli, config)) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(expand_tilde(path))?,
        None => Config::load_or_default(Config::default_path())?,
    };

    if let Some(key_file) = &cli.key_file {
        config.key_file = expand_tilde(key_file);
    }
    if cli.allow_other {
        config.mount.allow_other = true;
    }

    Ok(config)
}

fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    // Targets stay visible so `flatcryptfs::audit` records stand apart
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.try_init(),
    };

    result.map_err(|e| Error::Internal(e.to_string()))
}

fn cmd_mount(cli: &Cli, config: Config) -> Result<()> {
    let mount_point = &cli.mount_point;

    // Build mount options
    let mut options = vec![fuser::MountOption::FSName(config.mount.fs_name.clone())];

    if config.mount.auto_unmount {
        options.push(fuser::MountOption::AutoUnmount);
    }
    if config.mount.allow_other {
        options.push(fuser::MountOption::AllowOther);
    } else if config.mount.allow_root {
        options.push(fuser::MountOption::AllowRoot);
    }

    // Ensure mount point exists
    std::fs::create_dir_all(mount_point)?;

    let key_store = KeyStore::new(&config.key_file);
    let key = key_store.load_or_create()?;
    let cipher = Cipher::new(&key)?;
    drop(key);

    let handler = EncryptedFs::new(Arc::new(cipher), &config);
    let fs = FlatCryptFs::new(Arc::new(handler));

    info!("Key record: {:?}", key_store.path());
    if config.logging.audit {
        info!("Audit logging enabled");
    }
    info!("Mounting flatcryptfs at {:?}", mount_point);

    fuser::mount2(fs, mount_point, &options).map_err(|e| Error::Internal(e.to_string()))?;

    info!("Unmounted {:?}", mount_point);
    Ok(())
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
