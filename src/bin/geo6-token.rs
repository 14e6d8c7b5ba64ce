use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use geo6_api::{
    auth::credential::{issue_signed_token, sign_shared_secret},
    PolicyStore,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "geo6-token",
    version = env!("CARGO_PKG_VERSION"),
    about = "Issue credentials for GEO-6 API consumers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        global = true,
        env = "GEO6_ACCESS_FILE",
        default_value = "config/access.yaml",
        help = "Consumer access file"
    )]
    access_file: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured consumers
    List,

    /// Print a signed bearer token, valid for five minutes
    Jwt {
        /// Consumer id
        consumer: String,

        #[arg(long, default_value = "geo6-token", help = "Value of the iss claim")]
        issuer: String,
    },

    /// Print X-Geo6 headers for a single request
    Headers {
        /// Consumer id
        consumer: String,

        /// Request path, e.g. /geocode/getStreetList/1000
        path: String,

        #[arg(long, help = "Server host name the API runs under")]
        host: String,

        #[arg(long, default_value = "GET")]
        method: String,
    },
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let store = PolicyStore::load(&cli.access_file)?;
    let now = Utc::now().timestamp();

    match cli.command {
        Commands::List => {
            let mut consumers: Vec<&str> = store.consumers().collect();
            consumers.sort_unstable();
            for consumer in consumers {
                println!("{consumer}");
            }
        }
        Commands::Jwt { consumer, issuer } => {
            let secret = secret_for(&store, &consumer)?;
            let token = issue_signed_token(&consumer, secret, &issuer, now)
                .context("Failed to sign token")?;
            println!("{token}");
        }
        Commands::Headers {
            consumer,
            path,
            host,
            method,
        } => {
            let secret = secret_for(&store, &consumer)?;
            let method = method.to_ascii_uppercase();
            let token = sign_shared_secret(secret, &consumer, now, &host, &method, &path)
                .map_err(|e| anyhow!("Failed to sign request: {}", e))?;
            println!("X-Geo6-Consumer: {consumer}");
            println!("X-Geo6-Timestamp: {now}");
            println!("X-Geo6-Token: {token}");
        }
    }

    Ok(())
}

fn secret_for<'a>(store: &'a PolicyStore, consumer: &str) -> anyhow::Result<&'a str> {
    store
        .lookup(consumer)
        .map(|policy| policy.secret.as_str())
        .ok_or_else(|| anyhow!("Unknown consumer \"{}\"", consumer))
}
