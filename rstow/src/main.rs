use anyhow::Result;
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rstow",
    version,
    about = "Move files between a local directory and a storage backend",
    long_about = "`rstow` copies named files between a local directory and a configured storage backend \
(local directory, FTP, SSH/SCP or Azure blob storage) and prunes stale files where the backend supports it.

The backend is selected by the `backend` key of the TOML configuration file.

EXAMPLE:
    # Upload two files to the configured backend
    rstow --config backup.toml copy db.sql.gz report.csv

    # Delete files older than a week from a local backup directory
    rstow --config backup.toml prune --retention-days 7"
)]
struct Args {
    /// Path to the TOML storage configuration
    #[arg(short = 'c', long, value_name = "FILE")]
    config: std::path::PathBuf,

    // Progress & output
    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
enum Command {
    /// Upload files from the local directory to the backend, stopping at the first failure
    Copy {
        /// File names relative to the local and remote roots
        #[arg(required = true, value_name = "FILE")]
        files: Vec<String>,
    },
    /// Download files from the backend into the local directory, stopping at the first failure
    CopyFrom {
        /// File names relative to the local and remote roots
        #[arg(required = true, value_name = "FILE")]
        files: Vec<String>,
    },
    /// Delete backend files older than the retention period
    Prune {
        /// Files whose modification time is more than this many days in the past are deleted
        #[arg(long, value_name = "N")]
        retention_days: u32,
    },
    /// Print the backend name
    Name,
}

#[instrument(skip(args), fields(config = ?args.config))]
async fn async_main(args: Args) -> Result<()> {
    let config = common::StorageConfig::from_file(&args.config)?;
    let storage = remote::open(&config).await?;
    match args.command {
        Command::Copy { files } => {
            for file in &files {
                storage.copy(file).await?;
            }
        }
        Command::CopyFrom { files } => {
            for file in &files {
                storage.copy_from(file).await?;
            }
        }
        Command::Prune { retention_days } => match storage.prune(retention_days).await? {
            common::PruneOutcome::Pruned(summary) => println!("{summary}"),
            common::PruneOutcome::Unsupported => println!(
                "{}: pruning is not supported by this backend, nothing was deleted",
                storage.name()
            ),
        },
        Command::Name => println!("{}", storage.name()),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
