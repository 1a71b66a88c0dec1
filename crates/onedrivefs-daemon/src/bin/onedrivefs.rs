//! onedrivefs CLI - drive the provider from a shell
//!
//! Usage:
//!   onedrivefs mount                  Authorize and register the mount
//!   onedrivefs ls [path]              List a directory
//!   onedrivefs cat <path>             Print a file
//!   onedrivefs put <local> <remote>   Upload a local file
//!   onedrivefs unmount                Revoke and forget the credential
//!
//! Every file command runs in a fresh process and resumes the session from
//! the stored credential, the same way a host that unloaded the provider
//! between requests would.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use onedrivefs_core::{Config, EntryMetadata, OpenMode, RequestId, ACCESS_TOKEN_KEY};
use onedrivefs_daemon::{
    CloseFileOptions, CopyEntryOptions, CreateDirectoryOptions, CreateFileOptions,
    DeleteEntryOptions, Dispatcher, GetMetadataOptions, HostRequest, ListDirectoryOptions,
    LoopbackConnector, MetadataCache, MoveEntryOptions, OpenFileOptions, ProviderBridge,
    ReadFileOptions, Reply, SessionManager, StateStore, TruncateOptions, UnmountOptions,
    WriteFileOptions,
};

/// Bytes requested per read while streaming a file
const READ_CHUNK_SIZE: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(name = "onedrivefs")]
#[command(about = "Cloud drive provider for virtual file system hosts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: platform config dir)
    #[arg(short, long, global = true, env = "ONEDRIVEFS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize and register the file system with the host
    Mount,

    /// Revoke authorization and unregister the file system
    Unmount,

    /// Show mount and credential state
    Status,

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show entry metadata
    Stat {
        path: String,

        /// Include the thumbnail
        #[arg(long)]
        thumbnail: bool,
    },

    /// Write a file's contents to stdout
    Cat { path: String },

    /// Upload a local file
    Put { local: PathBuf, remote: String },

    /// Create a directory
    Mkdir { path: String },

    /// Delete a file or directory
    Rm { path: String },

    /// Move an entry
    Mv { source: String, target: String },

    /// Copy an entry
    Cp { source: String, target: String },

    /// Create an empty file
    Touch { path: String },

    /// Truncate a file
    Truncate { path: String, length: u64 },

    /// Print the effective configuration
    Config {
        /// Write a sample config file to the config path
        #[arg(long)]
        init: bool,
    },
}

/// Provider wired for one CLI invocation
struct Provider {
    session: Arc<SessionManager>,
    store: Arc<StateStore>,
    bridge: ProviderBridge,
    next_request: AtomicU64,
}

impl Provider {
    fn start(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let store = Arc::new(StateStore::open(config.state_db_path())?);
        let session = Arc::new(SessionManager::new(
            Arc::new(LoopbackConnector::new(config.loopback_root())),
            store.clone(),
            store.clone(),
            config.provider.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::with_cache(
            session.clone(),
            MetadataCache::with_capacity(config.cache.max_entries),
        ));

        let (bridge, handler) = ProviderBridge::new(config.dispatch.max_inflight_requests);
        tokio::spawn(handler.run(dispatcher));

        Ok(Self {
            session,
            store,
            bridge,
            next_request: AtomicU64::new(1),
        })
    }

    fn request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    async fn call(&self, request: HostRequest) -> Result<Reply, Box<dyn std::error::Error>> {
        Ok(self.bridge.call(request).await?)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load(),
    };

    if let Commands::Config { init } = cli.command {
        return show_config(&config, cli.config, init);
    }

    let provider = Provider::start(&config)?;

    match cli.command {
        Commands::Mount => {
            provider.session.mount().await?;
            info!(
                "Mounted {} ({})",
                config.provider.display_name, config.provider.file_system_id
            );
        }
        Commands::Unmount => {
            provider
                .call(HostRequest::Unmount(UnmountOptions {
                    file_system_id: config.provider.file_system_id.clone(),
                }))
                .await?;
            info!("Unmounted {}", config.provider.file_system_id);
        }
        Commands::Status => {
            let mounted = provider.store.mounted_ids()?;
            let has_token = provider.store.get_value(ACCESS_TOKEN_KEY)?.is_some();
            println!("file system:  {}", config.provider.file_system_id);
            println!(
                "mounted:      {}",
                mounted.contains(&config.provider.file_system_id)
            );
            println!("credential:   {}", if has_token { "stored" } else { "none" });
            println!("session:      {:?}", provider.session.phase());
            println!("state db:     {}", config.state_db_path().display());
            println!("drive root:   {}", config.loopback_root().display());
        }
        Commands::Ls { path } => {
            let reply = provider
                .call(HostRequest::ListDirectory(ListDirectoryOptions {
                    directory_path: path,
                }))
                .await?;
            if let Reply::Entries { entries, .. } = reply {
                for entry in &entries {
                    print_entry(entry);
                }
            }
        }
        Commands::Stat { path, thumbnail } => {
            let reply = provider
                .call(HostRequest::GetMetadata(GetMetadataOptions {
                    entry_path: path,
                    thumbnail,
                }))
                .await?;
            if let Reply::Metadata(entry) = reply {
                print_entry(&entry);
                if let Some(mime) = entry.mime_type {
                    println!("  mime type: {}", mime);
                }
                if let Some(thumb) = entry.thumbnail {
                    println!("  thumbnail: {} bytes", thumb.len());
                }
            }
        }
        Commands::Cat { path } => cat(&provider, path).await?,
        Commands::Put { local, remote } => put(&provider, local, remote).await?,
        Commands::Mkdir { path } => {
            provider
                .call(HostRequest::CreateDirectory(CreateDirectoryOptions {
                    directory_path: path,
                }))
                .await?;
        }
        Commands::Rm { path } => {
            provider
                .call(HostRequest::DeleteEntry(DeleteEntryOptions { entry_path: path }))
                .await?;
        }
        Commands::Mv { source, target } => {
            provider
                .call(HostRequest::MoveEntry(MoveEntryOptions {
                    source_path: source,
                    target_path: target,
                }))
                .await?;
        }
        Commands::Cp { source, target } => {
            provider
                .call(HostRequest::CopyEntry(CopyEntryOptions {
                    source_path: source,
                    target_path: target,
                }))
                .await?;
        }
        Commands::Touch { path } => {
            provider
                .call(HostRequest::CreateFile(CreateFileOptions { file_path: path }))
                .await?;
        }
        Commands::Truncate { path, length } => {
            provider
                .call(HostRequest::Truncate(TruncateOptions {
                    file_path: path,
                    length,
                }))
                .await?;
        }
        Commands::Config { .. } => {}
    }

    provider.bridge.shutdown().await;
    Ok(())
}

async fn cat(provider: &Provider, path: String) -> Result<(), Box<dyn std::error::Error>> {
    let open_id = provider.request_id();
    provider
        .call(HostRequest::OpenFile(OpenFileOptions {
            request_id: open_id,
            file_path: path,
            mode: OpenMode::Read,
        }))
        .await?;

    let mut stdout = std::io::stdout().lock();
    let mut offset = 0u64;
    loop {
        let reply = provider
            .call(HostRequest::ReadFile(ReadFileOptions {
                open_request_id: open_id,
                offset,
                length: READ_CHUNK_SIZE,
            }))
            .await?;
        let Reply::Chunk { data, has_more } = reply else {
            break;
        };
        stdout.write_all(&data)?;
        offset += data.len() as u64;
        if !has_more || data.is_empty() {
            break;
        }
    }
    stdout.flush()?;

    provider
        .call(HostRequest::CloseFile(CloseFileOptions {
            open_request_id: open_id,
        }))
        .await?;
    Ok(())
}

async fn put(
    provider: &Provider,
    local: PathBuf,
    remote: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = tokio::fs::read(&local).await?;

    provider
        .call(HostRequest::CreateFile(CreateFileOptions {
            file_path: remote.clone(),
        }))
        .await?;

    let open_id = provider.request_id();
    provider
        .call(HostRequest::OpenFile(OpenFileOptions {
            request_id: open_id,
            file_path: remote.clone(),
            mode: OpenMode::Write,
        }))
        .await?;

    let data = Bytes::from(data);
    let mut offset = 0usize;
    while offset < data.len() {
        let end = (offset + READ_CHUNK_SIZE as usize).min(data.len());
        provider
            .call(HostRequest::WriteFile(WriteFileOptions {
                open_request_id: open_id,
                offset: offset as u64,
                data: data.slice(offset..end),
            }))
            .await?;
        offset = end;
    }

    provider
        .call(HostRequest::CloseFile(CloseFileOptions {
            open_request_id: open_id,
        }))
        .await?;
    info!("Uploaded {:?} to {} ({} bytes)", local, remote, data.len());
    Ok(())
}

fn show_config(
    config: &Config,
    path: Option<PathBuf>,
    init: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if init {
        let path = path
            .or_else(Config::default_path)
            .ok_or("no config directory available")?;
        if path.exists() {
            return Err(format!("{} already exists", path.display()).into());
        }
        config.save_to(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn print_entry(entry: &EntryMetadata) {
    let kind = if entry.is_directory { 'd' } else { '-' };
    println!(
        "{} {:>12} {:>12} {}",
        kind, entry.size, entry.modification_time, entry.name
    );
}
