use clap::Parser;
use parcel_exchange::config::DEFAULT_DB_PATH;
use parcel_exchange::daemon::{self, ServeOptions};
use parcel_exchange::error::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parcel-exchanged")]
#[command(about = "Parcel exchange marketplace daemon")]
struct Cli {
    /// Overrides the host stored in the database config.
    #[arg(long, env = "PARCEL_EXCHANGE_HOST")]
    host: Option<String>,

    #[arg(long, env = "PARCEL_EXCHANGE_PORT")]
    port: Option<u16>,

    #[arg(long, env = "PARCEL_EXCHANGE_DB", default_value = DEFAULT_DB_PATH)]
    db: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,parcel_exchange=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    daemon::run_with_shutdown(
        ServeOptions {
            host: cli.host,
            port: cli.port,
            db_path: cli.db,
        },
        shutdown,
    )
    .await
}
