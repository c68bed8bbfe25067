use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use contract_auth::auth::{SigningSecret, SqliteCredentialStore};
use contract_auth::{AuthGateway, Config, LoginRequest};
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "contract-auth", version, about = "Manage credentials and sessions", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the token signing secret if it does not exist yet
    InitSecret,

    /// Register a user; the secret is read from stdin
    AddUser {
        identity: String,
        #[arg(long, default_value = "member")]
        role: String,
    },

    /// Allow a role to perform an action on a resource ("*" matches all)
    Grant {
        role: String,
        resource: String,
        action: String,
    },

    /// Print the effective configuration
    ShowConfig,

    /// Log in once and print the issued token; the secret is read from stdin
    Login {
        identity: String,
        #[arg(long)]
        device: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;

    match cli.command {
        Command::InitSecret => {
            let path = config.signing_secret_path()?;
            SigningSecret::load_or_create(&path)?;
            println!("signing secret ready at {}", path.display());
        }
        Command::AddUser { identity, role } => {
            let secret = read_secret().await?;
            let store = open_store(&config)?;
            let user_id = store.create_user(&identity, &secret, &role)?;
            println!("{user_id}");
        }
        Command::Grant {
            role,
            resource,
            action,
        } => {
            open_store(&config)?.grant(&role, &resource, &action)?;
            println!("granted {action} on {resource} to {role}");
        }
        Command::ShowConfig => {
            print!("{}", config.to_toml()?);
        }
        Command::Login { identity, device } => {
            let secret = read_secret().await?;
            let gateway = AuthGateway::open(&config)?;
            let mut request = LoginRequest::new(identity, secret);
            if let Some(device) = device {
                request = request.with_device(device);
            }
            match gateway.login(request).await {
                Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Err(err) => bail!("login failed ({}): {err}", err.code()),
            }
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SqliteCredentialStore> {
    SqliteCredentialStore::open(&config.credential_db_path()?, &config.password)
}

/// First line of stdin, without the trailing newline.
async fn read_secret() -> Result<String> {
    let mut line = String::new();
    tokio::io::BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read secret from stdin")?;
    let secret = line.trim_end_matches(['\r', '\n']).to_owned();
    if secret.is_empty() {
        bail!("No secret supplied on stdin");
    }
    Ok(secret)
}
