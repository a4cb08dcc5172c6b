use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lockdispatch::config::DispatchConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "lockdispatch")]
#[command(version, about = "Locksmith dispatch back office")]
pub struct Cli {
    /// Path to a config file (defaults to ./lockdispatch.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path. Overrides [database] path.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP/WebSocket server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// Enable dev mode (CORS permissive for a locally served front end)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and optionally the first admin account
    Init {
        #[arg(long)]
        admin_email: Option<String>,

        #[arg(long, default_value = "Administrator")]
        admin_name: String,

        #[arg(long, env = "LOCKDISPATCH_ADMIN_PASSWORD", hide_env_values = true)]
        admin_password: Option<String>,
    },
    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Compute weekly financial stats from the local database
    Stats {
        /// Any date inside the week (YYYY-MM-DD). Defaults to today.
        #[arg(short, long)]
        week: Option<String>,

        /// Persist the result as the week's saved stats
        #[arg(long)]
        save: bool,

        #[arg(long)]
        json: bool,
    },
    /// Poll a running server and print job changes
    Watch {
        /// Server base URL. Overrides [sync] server_url.
        #[arg(long)]
        url: Option<String>,

        /// Session token. Overrides [sync] token.
        #[arg(long, env = "LOCKDISPATCH_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Poll interval in seconds. Overrides [sync] poll_interval_secs.
        #[arg(short, long)]
        interval: Option<u64>,

        /// Exit after the first poll
        #[arg(long)]
        once: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum UserCommands {
    /// Create a user
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        /// admin, worker or client
        #[arg(long)]
        role: String,

        #[arg(long, env = "LOCKDISPATCH_USER_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        phone: Option<String>,

        /// Worker commission percentage (0-100)
        #[arg(long)]
        commission_rate: Option<f64>,
    },
    /// List users
    List {
        #[arg(long)]
        role: Option<String>,

        /// Include deactivated accounts
        #[arg(long)]
        all: bool,

        #[arg(long)]
        json: bool,
    },
    /// Deactivate a user and revoke their sessions
    Deactivate { id: i64 },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any problems
    Validate,
    /// Write a default lockdispatch.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = match &cli.command {
        Commands::Config {
            command: Some(ConfigCommands::Init),
        } => DispatchConfig::default(),
        _ => DispatchConfig::resolve(cli.config.as_deref())?,
    };
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    let _log_guard = lockdispatch::telemetry::init_logging(&config.logging)?;

    match &cli.command {
        Commands::Serve { port, host, dev } => {
            if let Some(port) = port {
                config.server.port = *port;
            }
            if let Some(host) = host {
                config.server.host = host.clone();
            }
            config.server.dev_mode |= *dev;
            cmd::cmd_serve(&config).await?;
        }
        Commands::Init {
            admin_email,
            admin_name,
            admin_password,
        } => {
            cmd::cmd_init(
                &config,
                admin_email.as_deref(),
                admin_name,
                admin_password.as_deref(),
            )?;
        }
        Commands::User { command } => cmd::cmd_user(&config, command.clone())?,
        Commands::Stats { week, save, json } => {
            cmd::cmd_stats(&config, week.as_deref(), *save, *json)?
        }
        Commands::Watch {
            url,
            token,
            interval,
            once,
        } => {
            if let Some(url) = url {
                config.sync.server_url = url.clone();
            }
            if let Some(token) = token {
                config.sync.token = Some(token.clone());
            }
            if let Some(secs) = interval {
                config.sync.poll_interval_secs = *secs;
            }
            cmd::cmd_watch(&config, *once).await?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command.clone())?
        }
    }

    Ok(())
}
