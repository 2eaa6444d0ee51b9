// cloudbus — command-line agent for a cloudbus cloud
//
// Joins a cloud with one local agent to watch the traffic, or sends a single
// application message and leaves.

mod config;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloudbus_core::cloud::messages;
use cloudbus_core::{Cloud, Iden, LocalAgent, Message, Payload};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "cloudbus")]
#[command(about = "cloudbus — peer-to-peer message bus agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter, e.g. "info" or "protocol=debug"; RUST_LOG wins when set
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the cloud and print every message received
    Run {
        /// Cloud to join (defaults to the configured one)
        #[arg(short, long)]
        cloud: Option<Uuid>,
        /// Local agent name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Send one application message
    Send {
        /// JSON payload; plain text is sent as a JSON string
        message: String,
        /// Destination agent identity (AGT:...); the whole cloud by default
        #[arg(short, long)]
        to: Option<String>,
        #[arg(short, long)]
        cloud: Option<Uuid>,
        /// How long to wait for delivery receipts, in seconds
        #[arg(long, default_value = "10")]
        wait: u64,
    },
    /// Inspect or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Path,
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(cli.log_level.as_deref().unwrap_or("warn")))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::Config::config_file()?,
    };

    match cli.command {
        Commands::Run { cloud, name } => cmd_run(&config_path, cloud, name).await,
        Commands::Send {
            message,
            to,
            cloud,
            wait,
        } => cmd_send(&config_path, message, to, cloud, wait).await,
        Commands::Config { action } => cmd_config(&config_path, action),
    }
}

fn start_cloud(config: &config::Config, cloud: Option<Uuid>) -> Result<Arc<Cloud>> {
    let uuid = cloud.unwrap_or(config.cloud_uuid);
    Cloud::from_config(uuid, &config.cloud).context("Failed to start cloud")
}

async fn close_cloud(cloud: Arc<Cloud>) -> Result<()> {
    tokio::task::spawn_blocking(move || cloud.close())
        .await
        .context("Failed to close cloud")
}

fn print_message(message: &Message) {
    let payload = match message.payload() {
        Payload::Null => String::new(),
        Payload::Generic(value) => value.to_string(),
        other => format!("{:?}", other),
    };
    println!(
        "{} {} {} {} {}",
        message.message_type().to_string().bold(),
        message.from().to_string().bright_cyan(),
        "→".dimmed(),
        message.to().to_wire(false).bright_cyan(),
        payload
    );
}

async fn cmd_run(config_path: &Path, cloud: Option<Uuid>, name: Option<String>) -> Result<()> {
    let config = config::Config::load_from(config_path)?;
    let cloud = start_cloud(&config, cloud)?;
    cloud.add_listener(Arc::new(|m: &Message| print_message(m)));
    let inbound = match (cloud.gateways().http(), config.cloud.http.advertise_address.as_ref()) {
        (Some(http), Some(_)) => Some(server::start(http.clone(), &config.cloud.http)),
        _ => None,
    };

    let agent = Arc::new(LocalAgent::new(name.as_deref().unwrap_or(&config.agent_name)));
    cloud.join(agent.clone()).context("Failed to join cloud")?;

    println!("{}", "cloudbus agent running".bold());
    println!("  Cloud:    {}", cloud.iden().to_string().bright_cyan());
    println!("  Agent:    {}", agent.iden().to_string().bright_yellow());
    println!("  Gateways: {}", cloud.gateways().names().join(", "));
    if let Some(addr) = inbound {
        println!("  Inbound:  {}{}", addr, config.cloud.http.advertise_path);
    }
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!();
    println!("{}", "Leaving cloud...".dimmed());
    if let Err(e) = cloud.leave(&agent) {
        tracing::warn!("Unable to announce departure: {}", e);
    }
    close_cloud(cloud).await
}

async fn cmd_send(
    config_path: &Path,
    text: String,
    to: Option<String>,
    cloud: Option<Uuid>,
    wait: u64,
) -> Result<()> {
    let config = config::Config::load_from(config_path)?;
    let payload: serde_json::Value =
        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

    let cloud = start_cloud(&config, cloud)?;
    let agent = Arc::new(LocalAgent::new(&config.agent_name));
    cloud.join(agent.clone()).context("Failed to join cloud")?;

    let to = match to {
        Some(iden) => iden.parse::<Iden>().context("Invalid destination identity")?,
        None => cloud.iden().clone(),
    };
    let message = messages::app(&agent, to, payload)?;
    let receipts = cloud.send(&message).context("Failed to send message")?;

    // the relay only delivers on its next sync; closing flushes it
    if let Err(e) = cloud.leave(&agent) {
        tracing::warn!("Unable to announce departure: {}", e);
    }
    close_cloud(cloud).await?;

    let status = receipts.wait(Duration::from_secs(wait)).await;
    println!(
        "{} {} ({:?})",
        "✓".green(),
        message.uuid().to_string().bright_cyan(),
        status
    );
    for receipt in receipts.receipts() {
        println!("  {:<5} {:?}", receipt.gateway(), receipt.status());
    }
    Ok(())
}

fn cmd_config(config_path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Show => {
            let config = config::Config::load_from(config_path)?;
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<28} {}", key.bright_yellow(), value);
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = config::Config::read(config_path)?;
            config.set(&key, &value)?;
            config.save_to(config_path)?;
            println!("{} {} = {}", "✓".green(), key, value);
        }
    }
    Ok(())
}
