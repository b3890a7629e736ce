//! filelu-cli: path-based access to a FileLu account
//!
//! Usage:
//!   filelu-cli ls [path]                 List a directory
//!   filelu-cli put <local> <remote>      Upload a file
//!   filelu-cli get <remote> [local]      Download a file
//!   filelu-cli mv <src> <dst>            Move a file or directory
//!   filelu-cli rm <path>...              Delete files
//!
//! The key comes from `--key`, `FILELU_KEY` or a saved remote (`--remote`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use filelu_fs::config::{load_remotes, save_remotes};
use filelu_fs::providers::{FileLuConfig, FileLuProvider, ProviderConfig, UploadOutcome};

#[derive(Parser)]
#[command(
    name = "filelu-cli",
    about = "filelu-cli: path-based access to FileLu storage",
    version,
    long_about = "Paths are slash separated. Listings print segments as \"(id) name\";\npassing those back skips the remote name lookup."
)]
struct Cli {
    /// FileLu key (My Account → Rclone key)
    #[arg(long, env = "FILELU_KEY", hide_env_values = true, global = true)]
    key: Option<String>,

    /// Saved remote to use
    #[arg(long, short = 'r', global = true)]
    remote: Option<String>,

    /// Root inside the account: path, folder id, name:id or file code
    #[arg(long, global = true)]
    root: Option<String>,

    /// API endpoint override
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// What to do when the destination already has the content (skip, upload)
    #[arg(long, global = true)]
    duplicates: Option<String>,

    /// How to treat several folders with the same name (first, error)
    #[arg(long, global = true)]
    ambiguity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls {
        /// Remote directory (default: root)
        #[arg(default_value = "")]
        path: String,
    },
    /// Show one entry
    Stat {
        path: String,
    },
    /// Create a directory
    Mkdir {
        path: String,
    },
    /// Remove an empty directory
    Rmdir {
        path: String,
    },
    /// Upload a local file
    Put {
        /// Local file path
        local: PathBuf,
        /// Remote destination path (default: root + local file name)
        remote: Option<String>,
    },
    /// Download a file
    Get {
        /// Remote file path
        remote: String,
        /// Local destination (default: remote file name)
        local: Option<PathBuf>,
    },
    /// Move a file or directory
    Mv {
        src: String,
        dst: String,
    },
    /// Delete one or more files
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Show account usage
    About,
    /// Print the direct download link of a file
    Link {
        path: String,
    },
    /// Manage saved remotes
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },
}

#[derive(Subcommand)]
enum RemoteAction {
    /// Save a remote using the global --key/--root/--endpoint options
    Add {
        name: String,
    },
    /// List saved remotes
    List,
    /// Forget a saved remote
    Remove {
        name: String,
    },
}

impl Cli {
    /// Merge the saved remote (if any) with command-line overrides.
    fn provider_config(&self) -> Result<ProviderConfig> {
        let mut config = match &self.remote {
            Some(name) => load_remotes()
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("No saved remote named {:?}", name))?,
            None => ProviderConfig {
                name: "filelu".to_string(),
                endpoint: None,
                api_key: None,
                root: None,
                extra: HashMap::new(),
            },
        };

        if self.key.is_some() {
            config.api_key = self.key.clone();
        }
        if self.root.is_some() {
            config.root = self.root.clone();
        }
        if self.endpoint.is_some() {
            config.endpoint = self.endpoint.clone();
        }
        if let Some(policy) = &self.duplicates {
            config.extra.insert("duplicate_policy".to_string(), policy.clone());
        }
        if let Some(policy) = &self.ambiguity {
            config.extra.insert("ambiguity_policy".to_string(), policy.clone());
        }
        Ok(config)
    }

    fn provider(&self) -> Result<FileLuProvider> {
        let config = FileLuConfig::from_provider_config(&self.provider_config()?)?;
        Ok(FileLuProvider::new(config)?)
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Bare file name for a download; the remote name never picks a directory.
fn local_name(remote_name: &str) -> Result<PathBuf> {
    Path::new(remote_name)
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("Cannot derive a local name from {:?}", remote_name))
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    if let Commands::Remote { action } = &cli.command {
        return manage_remotes(&cli, action);
    }

    let fs = cli.provider()?;

    match &cli.command {
        Commands::Ls { path } => {
            for entry in fs.list(path, &cancel).await.with_context(|| format!("ls {}", path))? {
                let kind = if entry.is_dir { 'd' } else { '-' };
                println!("{} {:>10}  {}", kind, format_size(entry.size), entry.path);
            }
        }
        Commands::Stat { path } => {
            let entry = fs.stat(path, &cancel).await.with_context(|| format!("stat {}", path))?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Mkdir { path } => {
            let id = fs.mkdir(path, &cancel).await.with_context(|| format!("mkdir {}", path))?;
            println!("({}) {}", id, path);
        }
        Commands::Rmdir { path } => {
            fs.rmdir(path, &cancel).await.with_context(|| format!("rmdir {}", path))?;
        }
        Commands::Put { local, remote } => {
            let remote = match remote {
                Some(r) => r.clone(),
                None => local
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("Cannot derive a remote name from {}", local.display()))?,
            };
            match fs.put(local, &remote, &cancel).await.with_context(|| format!("put {}", local.display()))? {
                UploadOutcome::Uploaded { file_code, folder_id } => {
                    println!("uploaded {} as {} (folder {})", remote, file_code, folder_id);
                }
                UploadOutcome::Duplicate { key } => {
                    println!("skipped {}: already present ({})", remote, key);
                }
            }
        }
        Commands::Get { remote, local } => {
            let local = match local {
                Some(l) => l.clone(),
                None => {
                    let object = fs.resolve_object(remote, &cancel).await?;
                    local_name(&object.name)?
                }
            };
            let n = fs.download(remote, &local, &cancel).await.with_context(|| format!("get {}", remote))?;
            println!("{} -> {} ({})", remote, local.display(), format_size(n));
        }
        Commands::Mv { src, dst } => {
            let summary = fs.move_path(src, dst, &cancel).await.with_context(|| format!("mv {} {}", src, dst))?;
            println!(
                "moved {} file(s), created {} folder(s)",
                summary.moved, summary.folders_created
            );
            for path in &summary.duplicates {
                println!("kept {}: destination already has it", path);
            }
        }
        Commands::Rm { paths } => {
            let n = fs.delete_many(paths, &cancel).await.context("rm")?;
            println!("deleted {} file(s)", n);
        }
        Commands::About => {
            let info = fs.about(&cancel).await?;
            println!("Total: {}", format_size(info.total));
            println!("Used:  {}", format_size(info.used));
            println!("Free:  {}", format_size(info.free));
        }
        Commands::Link { path } => {
            println!("{}", fs.link(path, &cancel).await.with_context(|| format!("link {}", path))?);
        }
        Commands::Remote { .. } => {}
    }
    Ok(())
}

fn manage_remotes(cli: &Cli, action: &RemoteAction) -> Result<()> {
    let mut remotes = load_remotes();
    match action {
        RemoteAction::Add { name } => {
            let mut config = cli.provider_config()?;
            config.name = name.clone();
            FileLuConfig::from_provider_config(&config)?;
            remotes.upsert(config);
            save_remotes(&remotes).map_err(|e| anyhow!(e))?;
            println!("saved remote {}", name);
        }
        RemoteAction::List => {
            for remote in &remotes.remotes {
                println!("{}\t{}", remote.name, remote.root.as_deref().unwrap_or(""));
            }
        }
        RemoteAction::Remove { name } => {
            if !remotes.remove(name) {
                return Err(anyhow!("No saved remote named {:?}", name));
            }
            save_remotes(&remotes).map_err(|e| anyhow!(e))?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    filelu_fs::init_logging();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    run(cli, cancel).await
}
