//! databrew CLI application
//!
//! Command-line interface for mirroring date-stamped scientific datasets
//! from FTP, SFTP, HTTP and the Climate Data Store into a local store.

use std::process;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use databrew::cli::{handle_fetch, handle_init, handle_list, handle_paths, Cli, Commands};
use databrew::errors::Result;

/// Time given to blocking transfers to notice cancellation at exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: could not start async runtime: {}", e);
            process::exit(1);
        }
    };
    let result = runtime.block_on(run());
    // dropping the remaining tasks removes their partial files
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Passwords referenced by `password_env` may live in a .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    init_logging(&cli);

    info!("databrew v{} starting", env!("CARGO_PKG_VERSION"));

    let catalog = cli.global.catalog.clone();
    match cli.command {
        Commands::List(args) => {
            info!("Executing list command");
            handle_list(catalog, args).await
        }
        Commands::Paths(args) => {
            info!("Executing paths command");
            handle_paths(catalog, args).await
        }
        Commands::Fetch(args) => {
            info!("Executing fetch command");
            handle_fetch(catalog, args).await
        }
        Commands::Init(args) => {
            info!("Executing init command");
            handle_init(args).await
        }
    }
}

/// Initialize logging based on CLI verbosity settings
fn init_logging(cli: &Cli) {
    let log_level = cli.log_level();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("databrew={}", log_level).parse() {
        filter = filter.add_directive(directive);
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose)
        .with_writer(std::io::stderr)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
