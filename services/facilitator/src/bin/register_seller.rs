//! Operator tool: create a seller and its API key in the payment database.

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use facilitator::{config::Config, database::Database, secrets::SecretResolver, telemetry};
use rand::RngCore;
use std::path::PathBuf;
use std::sync::Arc;

/// Register a seller with the x402 facilitator.
#[derive(Parser, Debug)]
#[command(name = "register-seller", version, about, long_about = None)]
struct Cli {
    /// API key to register. A random 32-byte hex key is generated when omitted.
    key: Option<String>,

    /// Config file (defaults to CONFIG_PATH, then config/facilitator.config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = Arc::new(Config::load(cli.config.as_deref())?);
    telemetry::init(&config.logging);

    let api_key = match cli.key.map(|k| k.trim().to_string()) {
        Some(key) if !key.is_empty() => key,
        Some(_) => anyhow::bail!("API key must not be empty"),
        None => generate_api_key(),
    };

    let resolver = SecretResolver::from_config(config.clone());
    let database_url = resolver.database_url().await?;
    let db = Database::connect(&database_url, &config.database)
        .await
        .context("Failed to connect to database")?;
    db.init_schema().await?;

    let seller_id = db
        .register_seller(&api_key)
        .await
        .context("Failed to register seller")?;

    println!("Seller registered");
    println!("  seller_id: {}", seller_id);
    println!("  api_key:   {}", api_key);
    Ok(())
}
