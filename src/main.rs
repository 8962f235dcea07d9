use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_PORT: u16 = 5646;
const DEFAULT_POOL_SIZE: usize = 100;

#[derive(Parser)]
#[command(
    name = "leafdb",
    version = VERSION,
    about = "Tiny disk-based relational engine."
)]
struct Cli {
    /// Path to the database heap file.
    dbfile: PathBuf,
    /// The server host address to bind to. Defaults to 0.0.0.0, allowing
    /// connections from any interface.
    #[arg(long, env = "LEAFDB_HOST", default_value = "0.0.0.0")]
    host: String,
    /// The TCP port to listen on.
    #[arg(short = 'p', long, env = "LEAFDB_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Number of page frames in the buffer pool.
    #[arg(short = 'l', long, env = "LEAFDB_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = leafdb::server::serve(&cli.dbfile, &cli.host, cli.port, cli.pool_size) {
        eprintln!("Fatal error: {}", err);
        process::exit(1);
    }
}
