use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossfill::{
    bencode, inspect,
    metadata::ItemMetadata,
    reconcile,
    report::Report,
    storage::{DryRun, FileStore},
    ContentItem, FillEvent,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "crossfill")]
#[command(about = "Fill missing pieces across torrents that share the same content", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy verified pieces between torrents holding identical content
    Fill(FillArgs),

    /// Pretty-print a bencoded file (.torrent, .fastresume, ...)
    Inspect {
        /// Path to the bencoded file
        file: PathBuf,
    },
}

#[derive(Args)]
struct FillArgs {
    /// Directory holding <hash>.torrent and <hash>.fastresume files
    #[arg(long, env = "CROSSFILL_DIR", default_value = ".")]
    dir: PathBuf,

    /// Run the full pass but discard all writes
    #[arg(long, env = "CROSSFILL_DRY_RUN", default_value_t = false)]
    dry_run: bool,

    /// Info hashes of the torrents to reconcile
    #[arg(required = true, num_args = 2..)]
    hashes: Vec<String>,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Fill(args) => match run_fill(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {:#}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Inspect { file } => run_inspect(file),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_fill(args: FillArgs) -> Result<()> {
    let metas = args
        .hashes
        .iter()
        .map(|hash| {
            ItemMetadata::load(&args.dir, hash).with_context(|| format!("loading {}", hash))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut items = metas
        .iter()
        .map(|m| m.open().with_context(|| format!("opening {}", m.hash)))
        .collect::<Result<Vec<_>>>()?;

    let events = if args.dry_run {
        let mut items: Vec<ContentItem<DryRun<FileStore>>> = items
            .into_iter()
            .map(|it| it.map_backend(DryRun::new))
            .collect();
        let events = reconcile(&mut items).context("reconciliation failed")?;
        let discarded: u64 = items.iter().map(|it| it.backend.discarded()).sum();
        info!(bytes = discarded, "dry run, nothing written");
        events
    } else {
        let events = reconcile(&mut items).context("reconciliation failed")?;
        for item in &mut items {
            item.backend
                .flush()
                .with_context(|| format!("flushing {}", item.id))?;
        }
        events
    };

    print_events(&events);
    print!("\n{}", Report::from_events(&events));
    for meta in &metas {
        println!("[done] {}", meta.content_root().display());
    }
    if !events.is_empty() && !args.dry_run {
        println!("\nForce a recheck of every torrent above in qBittorrent to update its piece state.");
    }
    Ok(())
}

fn print_events(events: &[FillEvent]) {
    for ev in events {
        println!("[+] {}", ev);
    }
}

fn run_inspect(path: PathBuf) -> ExitCode {
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("failed to read file {}: {}", path.display(), e);
            return ExitCode::from(2);
        }
    };
    let value = match bencode::decode(&raw) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("failed to decode bencoded data: {}", e);
            return ExitCode::from(3);
        }
    };
    print!("{}", inspect::render(&value));
    ExitCode::SUCCESS
}
