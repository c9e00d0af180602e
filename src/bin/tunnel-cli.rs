//! Command-line client for an SSH-HTTP bridge.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use ssh_http_bridge::client::{ClientOptions, Credentials, TunnelClient};

#[derive(Parser)]
#[command(name = "tunnel-cli")]
#[command(about = "Invoke HTTP routes over an SSH tunnel", long_about = None)]
struct Cli {
    /// Bridge address
    #[arg(short = 'H', long, default_value = "127.0.0.1:2222")]
    host: String,

    #[arg(short, long, default_value = "anonymous")]
    user: String,

    /// Password authentication
    #[arg(short, long, env = "TUNNEL_PASSWORD", conflicts_with = "identity")]
    password: Option<String>,

    /// Private key for public key authentication
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Expected host key fingerprint (SHA256:...)
    #[arg(long)]
    fingerprint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a route with an envelope
    Call {
        /// Routing key, e.g. /status
        route: String,
        /// Extra JSON object fields merged into the envelope
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Send a raw payload without building an envelope
    Raw {
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_cli=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let credentials = match (&cli.password, &cli.identity) {
        (Some(password), _) => Credentials::Password(password.clone()),
        (None, Some(path)) => Credentials::key_file(path, None)?,
        (None, None) => Credentials::None,
    };
    let mut options = ClientOptions::new(cli.user.clone(), credentials);
    if let Some(fingerprint) = &cli.fingerprint {
        options = options.pin_host_key(fingerprint.clone());
    }

    let client = TunnelClient::connect(cli.host.as_str(), options).await?;

    let body = match cli.command {
        Commands::Call { route, data } => {
            let fields = match data {
                Some(raw) => serde_json::from_str::<Map<String, Value>>(&raw)?,
                None => Map::new(),
            };
            client.request(&route, fields).await?
        }
        Commands::Raw { payload } => client.send_raw(payload.as_bytes()).await?,
    };

    let mut stdout = std::io::stdout();
    stdout.write_all(&body)?;
    stdout.flush()?;

    client.disconnect().await?;
    Ok(())
}
