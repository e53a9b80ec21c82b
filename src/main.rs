use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commons_licenses::config::{self, DownloadConfig, PipelineConfig};
use commons_licenses::store::{Store, StrMap};
use commons_licenses::{beacon, download, export, index, join};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "commons-licenses")]
#[command(about = "Join GND ids to Wikimedia Commons license and copyright data")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the file -> GND ids reverse index from the forward map
    BuildRev(BuildRevArgs),
    /// Join the media-info dump against the reverse index
    Join(JoinArgs),
    /// Export the forward map with licenses as NDJSON
    ExportJson(ExportArgs),
    /// Download a file with resume and optional SHA-256 verification
    Fetch(FetchArgs),
    /// Load the forward map from a BEACON file
    LoadForward(LoadForwardArgs),
}

#[derive(Args)]
struct BuildRevArgs {
    /// Path to the store file
    store: PathBuf,

    /// Commit every N forward-map pairs
    #[arg(long, default_value_t = config::REV_COMMIT_INTERVAL)]
    commit_interval: u64,
}

#[derive(Args)]
struct JoinArgs {
    /// Path to the store file
    store: PathBuf,

    /// Media-info JSON dump (.json, .json.gz or .json.bz2)
    dump: String,

    /// Commit every N dump records
    #[arg(long, default_value_t = config::JOIN_COMMIT_INTERVAL)]
    commit_interval: u64,

    /// Resume from last checkpoint if available
    #[arg(long)]
    resume: bool,

    /// Limit number of dump records to process (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Statement property holding the license
    #[arg(long, default_value = config::LICENSE_PROPERTY)]
    license_property: String,

    /// Statement property holding the copyright status
    #[arg(long, default_value = config::STATUS_PROPERTY)]
    status_property: String,
}

#[derive(Args)]
struct ExportArgs {
    /// Path to the store file
    store: PathBuf,

    /// Output NDJSON file
    out: PathBuf,

    /// Flush output every N rows
    #[arg(long, default_value_t = config::EXPORT_FLUSH_INTERVAL)]
    flush_interval: u64,
}

#[derive(Args)]
struct FetchArgs {
    url: String,

    /// Destination file
    dest: PathBuf,

    /// Expected SHA-256 of the complete file (hex)
    #[arg(value_parser = parse_digest)]
    sha256: Option<String>,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = config::HTTP_CONNECT_TIMEOUT_SECS)]
    connect_timeout: u64,

    /// Overall request timeout in seconds (default: none)
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args)]
struct LoadForwardArgs {
    /// Path to the store file
    store: PathBuf,

    /// BEACON file mapping GND ids to Commons files
    beacon: String,

    /// Commit every N lines
    #[arg(long, default_value_t = config::REV_COMMIT_INTERVAL)]
    commit_interval: u64,
}

fn parse_digest(s: &str) -> Result<String, String> {
    config::validate_sha256(s).map_err(|e| e.to_string())
}

fn run_build_rev(args: BuildRevArgs) -> Result<()> {
    let store = Store::open(&args.store)?;
    let config = PipelineConfig {
        rev_commit_interval: args.commit_interval,
        ..PipelineConfig::default()
    };

    let start = Instant::now();
    let stats = index::build_reverse_index(&store, &config)?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Build time:         {:.2}s", duration.as_secs_f64());
    println!();
    println!("Pairs read:         {}", stats.pairs_seen);
    println!("Pairs skipped:      {}", stats.pairs_skipped);
    println!("Duplicate ids:      {}", stats.duplicates);
    println!("Index keys:         {}", stats.keys);

    Ok(())
}

fn run_join(args: JoinArgs) -> Result<()> {
    let store = Store::open(&args.store)?;
    let config = PipelineConfig {
        join_commit_interval: args.commit_interval,
        license_property: args.license_property,
        status_property: args.status_property,
        limit: args.limit,
        ..PipelineConfig::default()
    };

    let start = Instant::now();
    let stats = join::run_join(&store, &args.dump, &config, args.resume)?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Join time:          {:.2}s", duration.as_secs_f64());
    println!();
    println!("Records read:       {}", stats.records_seen);
    println!("Records matched:    {}", stats.matched);
    println!("Records unmatched:  {}", stats.unmatched);
    println!("Records untitled:   {}", stats.untitled);
    println!("Records malformed:  {}", stats.malformed);
    println!("Licenses written:   {}", stats.writes);
    println!("License map size:   {}", store.len(StrMap::License)?);

    Ok(())
}

fn run_export(args: ExportArgs) -> Result<()> {
    let store = Store::open(&args.store)?;
    let config = PipelineConfig {
        export_flush_interval: args.flush_interval,
        ..PipelineConfig::default()
    };

    let start = Instant::now();
    let rows = export::write_ndjson(&store, &args.out, &config)?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Export time:        {:.2}s", duration.as_secs_f64());
    println!("Rows written:       {}", rows);
    println!("Output:             {}", args.out.display());

    Ok(())
}

fn run_fetch(args: FetchArgs) -> Result<()> {
    let config = DownloadConfig {
        connect_timeout: Duration::from_secs(args.connect_timeout),
        timeout: args.timeout.map(Duration::from_secs),
        ..DownloadConfig::default()
    };
    let client = download::create_client(&config)?;

    let start = Instant::now();
    let path = download::fetch(&client, &args.url, &args.dest, args.sha256.as_deref())?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Fetch time:         {:.2}s", duration.as_secs_f64());
    println!("File:               {}", path.display());
    if args.sha256.is_some() {
        println!("SHA-256:            verified");
    }

    Ok(())
}

fn run_load_forward(args: LoadForwardArgs) -> Result<()> {
    let store = Store::open(&args.store)?;
    let config = PipelineConfig {
        rev_commit_interval: args.commit_interval,
        ..PipelineConfig::default()
    };

    let start = Instant::now();
    let stats = beacon::load_forward(&store, &args.beacon, &config)?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Load time:          {:.2}s", duration.as_secs_f64());
    println!();
    println!("Lines read:         {}", stats.lines);
    println!("Links loaded:       {}", stats.loaded);
    println!("Lines skipped:      {}", stats.skipped);
    println!("Forward map size:   {}", store.len(StrMap::Forward)?);

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::BuildRev(args) => run_build_rev(args),
        Commands::Join(args) => run_join(args),
        Commands::ExportJson(args) => run_export(args),
        Commands::Fetch(args) => run_fetch(args),
        Commands::LoadForward(args) => run_load_forward(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
