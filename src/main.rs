use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use parcel_exchange::config::DEFAULT_DB_PATH;
use parcel_exchange::domains::user::NewUser;
use parcel_exchange::error::{ParcelExchangeError, Result};
use parcel_exchange::interfaces::providers::UserDirectory;
use parcel_exchange::services::daemon_client::DaemonClient;
use parcel_exchange::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "parcel-exchange")]
#[command(about = "Parcel exchange operator CLI")]
struct Cli {
    #[arg(long, env = "PARCEL_EXCHANGE_DB", default_value = DEFAULT_DB_PATH)]
    db: String,

    #[arg(long, default_value = "http://127.0.0.1:8080")]
    daemon: String,

    #[arg(long, env = "PARCEL_EXCHANGE_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Creates a user in the local database and prints a bearer token.
    UserAdd {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        rating: Option<f64>,

        #[arg(long, default_value_t = false)]
        verified: bool,
    },
    Health,
    Matches {
        #[arg(long)]
        parcel: i32,

        #[arg(long)]
        sort: Option<String>,

        #[arg(long)]
        min_score: Option<u8>,

        #[arg(long)]
        limit: Option<usize>,
    },
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::UserAdd {
            name,
            email,
            rating,
            verified,
        } => {
            let store = SqliteStore::new(&cli.db).await?;
            let user = store
                .create_user(NewUser {
                    name,
                    email,
                    rating,
                    identity_verified: verified,
                })
                .await?;
            let token = store.issue_token(user.id).await?;
            println!("user {} created", user.id);
            println!("token: {token}");
        }
        Commands::Health => {
            let client = DaemonClient::new(cli.daemon, cli.token.unwrap_or_default())?;
            print_json(&client.health().await?)?;
        }
        Commands::Matches {
            parcel,
            sort,
            min_score,
            limit,
        } => {
            let client = DaemonClient::new(cli.daemon, require_token(cli.token)?)?;
            let body = client
                .matches(parcel, sort.as_deref(), min_score, limit)
                .await?;
            print_json(&body)?;
        }
        Commands::Stats => {
            let client = DaemonClient::new(cli.daemon, require_token(cli.token)?)?;
            print_json(&client.stats().await?)?;
        }
    }
    Ok(())
}

fn require_token(token: Option<String>) -> Result<String> {
    token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            ParcelExchangeError::Unauthorized(
                "--token or PARCEL_EXCHANGE_TOKEN is required".to_string(),
            )
        })
}

fn print_json(value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ParcelExchangeError::Serialization(e.to_string()))?;
    println!("{text}");
    Ok(())
}
