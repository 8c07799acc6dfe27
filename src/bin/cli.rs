//! Redo Log CLI
//!
//! Offline inspection and maintenance of redo log segments.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use redolog::rollover;
use redolog::wal::{FileHeader, LogScanner};
use redolog::{MailboxStore, RedoConfig, RedoError, RedoLogManager, RedoableOp, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Redo log CLI
#[derive(Parser, Debug)]
#[command(name = "redolog-cli")]
#[command(about = "Inspect and maintain mailbox redo log segments")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every record of one or more segments
    Dump {
        /// Segment files, printed in the given order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print only the header
        #[arg(long)]
        header_only: bool,
    },

    /// Check a segment's header and records
    Verify {
        /// Segment file
        file: PathBuf,
    },

    /// List archived segments
    Archives {
        /// Archive directory
        #[arg(short, long, default_value = "./redolog/archive")]
        dir: PathBuf,
    },

    /// Archive the active segment of a cleanly shut down log
    Rollover {
        /// Data directory holding redo.log and archive/
        #[arg(short, long, default_value = "./redolog")]
        data_dir: PathBuf,
    },
}

/// Store for maintenance runs that must never replay anything
struct NoReplayStore;

impl MailboxStore for NoReplayStore {
    fn redo(&self, op: &RedoableOp) -> Result<()> {
        Err(RedoError::Store(format!("unexpected replay of {}", op)))
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,redolog=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Dump { files, header_only } => dump(&files, header_only),
        Commands::Verify { file } => verify(&file),
        Commands::Archives { dir } => archives(&dir),
        Commands::Rollover { data_dir } => force_rollover(&data_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_header(path: &Path, header: &FileHeader) {
    println!("{}", path.display());
    println!("  version:   {}", header.version);
    println!("  sequence:  {}", header.sequence);
    println!("  open:      {}", header.open);
    println!("  created:   {}", header.create_time);
    println!("  first op:  {}", header.first_op_tstamp);
    println!("  last op:   {}", header.last_op_tstamp);
}

fn dump(files: &[PathBuf], header_only: bool) -> Result<()> {
    for path in files {
        if header_only {
            print_header(path, &FileHeader::read_from(path)?);
            continue;
        }

        let (records, scan) = LogScanner::scan(path)?;
        print_header(path, &scan.header);
        for record in &records {
            println!("  @{}: {}", record.offset, record.op);
        }
        if scan.junk_bytes > 0 {
            println!("  {} bytes of junk after offset {}", scan.junk_bytes, scan.last_good_offset);
        }
    }
    Ok(())
}

fn verify(path: &Path) -> Result<()> {
    let scan = LogScanner::verify(path)?;
    println!(
        "{}: seq {}, {} records, {} good bytes, {} junk bytes, {}",
        path.display(),
        scan.header.sequence,
        scan.records,
        scan.last_good_offset,
        scan.junk_bytes,
        if scan.header.open { "not closed cleanly" } else { "closed cleanly" }
    );
    if scan.junk_bytes > 0 {
        return Err(RedoError::Corruption(format!(
            "{} bytes of junk after offset {}",
            scan.junk_bytes, scan.last_good_offset
        )));
    }
    Ok(())
}

fn archives(dir: &Path) -> Result<()> {
    let segments = rollover::all_archive_logs(dir)?;
    if segments.is_empty() {
        println!("No archived segments in {}", dir.display());
        return Ok(());
    }
    for segment in segments {
        println!("{:>8}  {:>12}  {}", segment.seq, segment.len, segment.path.display());
    }
    Ok(())
}

fn force_rollover(data_dir: &Path) -> Result<()> {
    let config = RedoConfig::with_data_dir(data_dir);

    if config.log_path.exists() && FileHeader::read_from(&config.log_path)?.open {
        return Err(RedoError::InvalidState(format!(
            "{} was not shut down cleanly; start the server to run crash recovery first",
            config.log_path.display()
        )));
    }

    let manager = RedoLogManager::new(config)?;
    manager.start(&NoReplayStore)?;

    let rolled = manager.force_rollover();
    let stopped = manager.stop();

    match rolled? {
        Some(archived) => println!(
            "Archived {}; active sequence is now {}",
            archived.display(),
            manager.current_log_sequence()
        ),
        None => println!("Nothing to roll over"),
    }
    stopped
}
