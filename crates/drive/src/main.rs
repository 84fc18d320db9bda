//! KeyDrive
//!
//! Command-line front end for drives stored in a key-value namespace.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use drive::config::{Backend, Config};
use drive::store::{Namespace, StatStore};
use drive::{
    sort_entries, DirEntry, Drive, DriveError, EntryKind, ListOptions, LocalDrive, MemoryDrive,
    PutOptions, RmDirOptions, SortBy, SortOrder, SqliteDrive, Stat,
};
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// KeyDrive - a hierarchical filesystem over an ordered key-value store.
#[derive(Parser, Debug)]
#[command(name = "keydrive")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List a directory
    Ls {
        /// Directory to list
        #[arg(default_value = "/")]
        path: String,

        /// Walk the whole subtree
        #[arg(long, short)]
        recursive: bool,

        /// Show size and modification time
        #[arg(long, short = 'l')]
        long: bool,

        /// Hide directories
        #[arg(long)]
        files_only: bool,

        /// Only show entries whose name matches this regular expression
        #[arg(long)]
        search: Option<String>,

        /// Sort key
        #[arg(long, value_enum)]
        sort: Option<SortKey>,

        /// Reverse the sort order
        #[arg(long)]
        reverse: bool,
    },

    /// Show the stat of a file or directory
    Stat {
        /// Path to inspect
        path: String,
    },

    /// Print a file to stdout
    Cat {
        /// File to print
        path: String,
    },

    /// Write a file (from --file, --text, or stdin)
    Put {
        /// Destination path in the drive
        path: String,

        /// Local file to upload
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Literal text content
        #[arg(long)]
        text: Option<String>,

        /// Mark the file executable
        #[arg(long)]
        executable: bool,
    },

    /// Create an empty directory
    Mkdir {
        /// Directory to create
        path: String,
    },

    /// Remove a file or directory
    Rm {
        /// Path to remove
        path: String,

        /// Remove directories and their contents
        #[arg(long, short)]
        recursive: bool,
    },

    /// Copy a file, or a folder with --recursive
    Cp {
        source: String,
        dest: String,

        /// Copy every file below a folder
        #[arg(long, short)]
        recursive: bool,
    },

    /// Move a file
    Mv { source: String, dest: String },

    /// Copy a drive folder onto the local filesystem
    Export {
        /// Folder in the drive
        drive_path: String,

        /// Local destination directory
        fs_dest: PathBuf,
    },

    /// Copy a local directory into the drive
    Import {
        /// Local source directory
        fs_src: PathBuf,

        /// Destination folder in the drive
        drive_path: String,
    },
}

/// Sort keys for `ls`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Date,
    Size,
    Type,
}

impl From<SortKey> for SortBy {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Name => SortBy::Name,
            SortKey::Date => SortBy::Date,
            SortKey::Size => SortBy::Size,
            SortKey::Type => SortBy::Type,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.drive.log_level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match config.storage.backend {
        Backend::Sqlite => {
            let database = config.database_path();
            tracing::debug!("Opening drive database at {:?}", database);
            let drive = SqliteDrive::open(&database)
                .with_context(|| format!("Failed to open drive at {}", database.display()))?
                .with_options(config.drive_options());
            run(&drive, cli.command).await
        }
        Backend::Memory => {
            tracing::warn!("Using the in-memory backend; changes are discarded on exit");
            let drive = MemoryDrive::in_memory().with_options(config.drive_options());
            run(&drive, cli.command).await
        }
    }
}

async fn run<N: Namespace, S: StatStore>(drive: &Drive<N, S>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Ls {
            path,
            recursive,
            long,
            files_only,
            search,
            sort,
            reverse,
        } => {
            let mut options = ListOptions {
                recursive,
                file_only: files_only,
                with_stats: long || matches!(sort, Some(SortKey::Date | SortKey::Size)),
                search: None,
            };
            if let Some(pattern) = search {
                options.search =
                    Some(Regex::new(&pattern).with_context(|| format!("Invalid search pattern: {}", pattern))?);
            }

            let mut entries = drive.list(&path, options).await?;
            if let Some(key) = sort {
                let order = if reverse {
                    SortOrder::Descending
                } else {
                    SortOrder::Ascending
                };
                sort_entries(&mut entries, key.into(), order);
            }
            for entry in &entries {
                print_entry(entry, recursive, long);
            }
        }
        Commands::Stat { path } => {
            let stat = drive.stat(&path).await?;
            print_stat(&path, &stat);
        }
        Commands::Cat { path } => {
            let content = drive.read(&path).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&content).await?;
            stdout.flush().await?;
        }
        Commands::Put {
            path,
            file,
            text,
            executable,
        } => {
            let content = match (file, text) {
                (Some(file), _) => tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("Failed to read {}", file.display()))?,
                (None, Some(text)) => text.into_bytes(),
                (None, None) => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };
            let options = PutOptions {
                executable,
                ..PutOptions::default()
            };
            let seq = drive.put(&path, &content, options).await?;
            tracing::info!(path = %path, seq, bytes = content.len(), "Stored file");
        }
        Commands::Mkdir { path } => {
            drive.mkdir(&path).await?;
        }
        Commands::Rm { path, recursive } => {
            if !drive.del(&path).await? {
                match drive.rm_dir(&path, RmDirOptions { recursive }).await {
                    Err(DriveError::NotEmpty(dir)) => {
                        anyhow::bail!("{} is not empty (use --recursive)", dir)
                    }
                    result => result?,
                }
            }
        }
        Commands::Cp {
            source,
            dest,
            recursive,
        } => {
            if recursive {
                let summary = drive.copy_folder(&source, &dest).await?;
                println!("copied {} files ({} bytes)", summary.files, summary.bytes);
            } else {
                drive.copy(&source, &dest).await?;
            }
        }
        Commands::Mv { source, dest } => {
            drive.move_file(&source, &dest).await?;
        }
        Commands::Export {
            drive_path,
            fs_dest,
        } => {
            let local = LocalDrive::new(&fs_dest).with_chunk_size(drive.options().chunk_size);
            let summary = drive.export(&drive_path, &local, "/").await?;
            println!(
                "exported {} files ({} bytes) to {}",
                summary.files,
                summary.bytes,
                fs_dest.display()
            );
        }
        Commands::Import { fs_src, drive_path } => {
            let local = LocalDrive::new(&fs_src).with_chunk_size(drive.options().chunk_size);
            let summary = drive.import(&local, "/", &drive_path).await?;
            println!(
                "imported {} files ({} bytes) into {}",
                summary.files, summary.bytes, drive_path
            );
        }
    }
    Ok(())
}

fn print_entry(entry: &DirEntry, full_path: bool, long: bool) {
    let mut label = if full_path {
        entry.path.clone()
    } else {
        entry.name.clone()
    };
    if entry.kind == EntryKind::Directory {
        label.push('/');
    }

    if !long {
        println!("{}", label);
        return;
    }

    let (size, mtime) = entry
        .stat
        .as_ref()
        .map(|stat| (stat.size, stat.record.as_ref().map_or(0, |r| r.mtime_ms)))
        .unwrap_or((0, 0));
    println!("{:>12} {:>14} {}", size, mtime, label);
}

fn print_stat(path: &str, stat: &Stat) {
    let kind = if stat.is_file() { "file" } else { "directory" };
    println!("path:        {}", path);
    println!("type:        {}", kind);
    if stat.is_file() {
        println!("size:        {}", stat.size);
        println!("executable:  {}", stat.executable);
        if let Some(seq) = stat.seq {
            println!("seq:         {}", seq);
        }
        if let Some(target) = &stat.linkname {
            println!("linkname:    {}", target);
        }
    }
    if let Some(count) = stat.items_count {
        println!("items:       {}", count);
    }
    if let Some(record) = &stat.record {
        println!("birthtime:   {}", record.birthtime_ms);
        println!("mtime:       {}", record.mtime_ms);
        println!("ctime:       {}", record.ctime_ms);
        println!("atime:       {}", record.atime_ms);
        for (key, value) in &record.extras {
            println!("{:<12} {}", format!("{}:", key), value);
        }
    }
}
