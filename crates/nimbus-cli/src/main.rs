//! nimbus: command-line access to a local data directory.
//!
//! Usage:
//!   nimbus init
//!   nimbus put ./report.pdf /work/report.pdf
//!   nimbus ls /work
//!   nimbus mv /work /archive/work
//!   nimbus trash /archive/work && nimbus restore /.cozy_trash/work
//!   nimbus fsck --fail-fast
//!
//! The data directory holds `nimbus.ron` (optional), the SQLite index and
//! the object tree. Each tenant gets a subdirectory.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;

use nimbus_types::{IndexDoc, TRASH_DIR_PATH};
use nimbus_vfs::{CreateOptions, FsckLog, Instance, Vfs, VfsError};

/// Personal cloud file system over a local data directory.
#[derive(Parser, Debug)]
#[command(name = "nimbus")]
#[command(about = "Personal cloud file system over a local data directory")]
struct Args {
    /// Data directory (default: $XDG_DATA_HOME/nimbus)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Tenant whose hierarchy to use
    #[arg(long, default_value = "default")]
    tenant: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the data directory, root and trash
    Init,
    /// Create a directory
    Mkdir {
        path: String,
        /// Create missing parents
        #[arg(short, long)]
        parents: bool,
    },
    /// Upload a local file
    Put {
        local: PathBuf,
        remote: String,
        /// Replace the content of an existing file, keeping a version
        #[arg(long)]
        overwrite: bool,
    },
    /// Download a file, to stdout when no local path is given
    Get { remote: String, local: Option<PathBuf> },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Move or rename
    Mv { from: String, to: String },
    /// Remove a file or an empty directory
    Rm {
        path: String,
        /// Remove a directory and everything below it
        #[arg(short, long)]
        recursive: bool,
    },
    /// Move to the trash
    Trash { path: String },
    /// Restore from the trash
    Restore { path: String },
    /// Permanently delete the trash content
    EmptyTrash,
    /// Show disk usage and quota
    Du,
    /// Check index and content consistency; exits 1 on findings
    Fsck {
        /// Stop at the first finding
        #[arg(long)]
        fail_fast: bool,
    },
    /// List retained versions of a file
    Versions { remote: String },
    /// Make a version the current content
    Revert { remote: String, version: String },
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nimbus")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    if let Err(e) = nimbus_telemetry::init_tracing("warn") {
        eprintln!("tracing setup failed: {e}");
    }

    let args = Args::parse();
    let root = args.data_dir.unwrap_or_else(default_data_dir);
    let dir = root.join(&args.tenant);
    let instance = Instance::open_local(&args.tenant, &dir)
        .await
        .with_context(|| format!("opening {}", dir.display()))?;
    let vfs = instance.vfs().await?;
    tracing::debug!(tenant = %args.tenant, dir = %dir.display(), "vfs ready");

    run(&vfs, args.command, &dir).await
}

async fn run(vfs: &Vfs, command: Command, dir: &std::path::Path) -> Result<ExitCode> {
    match command {
        Command::Init => {
            println!("initialized {}", dir.display());
        }
        Command::Mkdir { path, parents } => {
            let doc = if parents { vfs.mkdir_all(&path).await? } else { vfs.mkdir(&path).await? };
            println!("{}", doc.id);
        }
        Command::Put { local, remote, overwrite } => {
            let file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("reading {}", local.display()))?;
            let size = file.metadata().await?.len();
            let opts = CreateOptions {
                size: Some(size),
                overwrite,
                ..Default::default()
            };
            let mut writer = vfs.create(&remote, opts).await?;
            writer.write_from(file).await?;
            let doc = writer.close().await?;
            println!("{}\t{}\t{}", doc.id, doc.size, doc.mime);
        }
        Command::Get { remote, local } => {
            let mut reader = vfs.open(&remote).await?;
            match local {
                Some(path) => {
                    let mut out = tokio::fs::File::create(&path).await?;
                    tokio::io::copy(&mut reader, &mut out).await?;
                    AsyncWriteExt::flush(&mut out).await?;
                }
                None => {
                    let data = reader.read_all().await?;
                    let mut out = std::io::stdout().lock();
                    out.write_all(&data)?;
                    out.flush()?;
                }
            }
        }
        Command::Ls { path } => {
            for child in vfs.read_dir(&path).await? {
                match child {
                    IndexDoc::Dir(d) => println!("d\t-\t{}/", d.name),
                    IndexDoc::File(f) => println!("f\t{}\t{}", f.size, f.name),
                }
            }
        }
        Command::Mv { from, to } => {
            vfs.rename(&from, &to).await?;
        }
        Command::Rm { path, recursive } => {
            if recursive {
                vfs.remove_all(&path).await?;
            } else {
                vfs.remove(&path).await?;
            }
        }
        Command::Trash { path } => {
            let doc = vfs.trash(&path).await?;
            println!("{TRASH_DIR_PATH}/{}", doc.name());
        }
        Command::Restore { path } => match vfs.restore(&path).await? {
            IndexDoc::Dir(d) => println!("{}", d.fullpath),
            IndexDoc::File(f) => println!("{}", f.name),
        },
        Command::EmptyTrash => {
            vfs.destroy_trash().await?;
        }
        Command::Du => {
            let q = vfs.quota().await?;
            println!("used\t{}", q.used);
            println!("files\t{}", q.files);
            println!("versions\t{}", q.versions);
            println!("trash\t{}", q.trash);
            if q.quota > 0 {
                println!("quota\t{}", q.quota);
            } else {
                println!("quota\tunlimited");
            }
        }
        Command::Fsck { fail_fast } => {
            let mut findings = 0usize;
            let mut print = |log: FsckLog| {
                findings += 1;
                match serde_json::to_string(&log) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "unprintable fsck finding"),
                }
            };
            vfs.fsck_with(&mut print, fail_fast).await?;
            if findings > 0 {
                tracing::warn!(findings, "fsck found inconsistencies");
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Versions { remote } => {
            for v in vfs.versions(&remote).await? {
                println!("{}\t{}\t{}", v.id, v.size, v.created_at.to_rfc3339());
            }
        }
        Command::Revert { remote, version } => match vfs.revert(&remote, &version).await {
            Ok(doc) => println!("{}\t{}", doc.id, doc.size),
            Err(VfsError::NotFound(what)) => {
                eprintln!("no such version: {what}");
                return Ok(ExitCode::FAILURE);
            }
            Err(e) => return Err(e.into()),
        },
    }
    Ok(ExitCode::SUCCESS)
}
