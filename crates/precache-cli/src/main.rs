//! precache - pre-cache a static web app's assets and serve them offline.
//!
//! Drives the precache-core lifecycle against the on-disk cache store and
//! the real network, using the worker configuration at
//! `~/.config/precache/config.json` (or `$PRECACHE_CONFIG`).

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use precache_core::{
    missing_assets, CacheStorage, DiskStorage, HttpNetwork, Method, RegisterOutcome,
    Registration, Request, WorkerConfig,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable overriding the config file location
const CONFIG_ENV: &str = "PRECACHE_CONFIG";

const USAGE: &str = "\
Usage: precache <command>

Commands:
  install             Fetch every manifest asset into the current cache and activate it
  status              Show the configured cache and whether it is complete
  keys                List cache identifiers in the store
  fetch <url> [--html]  Answer a GET request the way the worker would
  purge               Delete every cache store";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn load_config() -> Result<WorkerConfig> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => WorkerConfig::load_from(&PathBuf::from(path)),
        None => WorkerConfig::load(),
    }
}

fn open_registration(config: &WorkerConfig) -> Result<Registration<DiskStorage, HttpNetwork>> {
    let root = config.storage_dir()?;
    let storage = DiskStorage::new(root.clone())
        .with_context(|| format!("Failed to open cache store at {}", root.display()))?;
    let network = HttpNetwork::new()?;
    Ok(Registration::new(Arc::new(storage), Arc::new(network)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let command = match args.get(1) {
        Some(command) => command.as_str(),
        None => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    match command {
        "install" => install().await,
        "status" => status().await,
        "keys" => keys().await,
        "fetch" => {
            let url = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("fetch needs a URL\n\n{}", USAGE))?;
            let html = args.iter().skip(3).any(|a| a == "--html");
            fetch(url, html).await
        }
        "purge" => purge().await,
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

async fn install() -> Result<()> {
    let config = load_config()?;
    info!(cache = %config.cache_name, "precache install starting");
    let registration = open_registration(&config)?;

    match registration.register(config).await? {
        RegisterOutcome::Activated { install, activate } => {
            println!(
                "Installed {} ({} assets, {} bytes)",
                install.cache_name, install.entries, install.bytes
            );
            for name in &activate.evicted {
                println!("Evicted {}", name);
            }
            for name in &activate.failed {
                println!("Could not delete {}", name);
            }
        }
        RegisterOutcome::Waiting { install } => {
            println!("Installed {} (waiting)", install.cache_name);
        }
        RegisterOutcome::Resumed { activate } => {
            println!("Resumed {}", activate.kept);
        }
    }
    Ok(())
}

async fn status() -> Result<()> {
    let config = load_config()?;
    let registration = open_registration(&config)?;
    let storage = registration.storage();

    let scope = config.scope_url()?;
    let assets = config.assets.resolve(&scope)?;
    let present = storage.has(&config.cache_name).await?;
    let missing = missing_assets(storage.as_ref(), &config.cache_name, &assets).await?;
    let complete = present && missing.is_empty();

    println!("Cache:    {}", config.cache_name);
    println!("Scope:    {}", scope);
    println!("Store:    {}", storage.root().display());
    println!("Cached:   {}/{}", assets.len() - missing.len(), assets.len());
    println!(
        "State:    {}",
        match (present, complete) {
            (false, _) => "not installed",
            (true, false) => "incomplete",
            (true, true) => "installed",
        }
    );
    for url in &missing {
        println!("Missing:  {}", url);
    }
    Ok(())
}

async fn keys() -> Result<()> {
    let config = load_config()?;
    let registration = open_registration(&config)?;
    let keys = registration.storage().keys().await?;
    if keys.is_empty() {
        println!("No caches");
    }
    for key in keys {
        let marker = if key == config.cache_name { " (current)" } else { "" };
        println!("{}{}", key, marker);
    }
    Ok(())
}

async fn fetch(url: &str, html: bool) -> Result<()> {
    let config = load_config()?;
    let scope = config.scope_url()?;
    let registration = open_registration(&config)?;
    let cache = config.cache_name.clone();
    // Without an active version the request still goes to the network
    if let Err(e) = registration.resume(config).await {
        warn!(cache = %cache, error = %e, "Could not bring cache up, fetching uncached");
    }

    let target = scope
        .join(url)
        .with_context(|| format!("Invalid URL: {}", url))?;
    let mut request = Request::new(Method::GET, target);
    if html {
        request = request.accepting_html();
    }

    let client = registration.connect_client().await;
    match registration.fetch(client, request).await? {
        Some(response) => {
            eprintln!(
                "{} {} ({} bytes)",
                response.status(),
                response.content_type().unwrap_or("-"),
                response.body().len()
            );
            println!("{}", String::from_utf8_lossy(response.body()));
        }
        None => eprintln!("No response (offline and not cached)"),
    }
    Ok(())
}

async fn purge() -> Result<()> {
    let config = load_config()?;
    let registration = open_registration(&config)?;
    let storage = registration.storage();
    for key in storage.keys().await? {
        storage.delete(&key).await?;
        println!("Deleted {}", key);
    }
    Ok(())
}
