//! CLI entry point for imagestore-token: API token administration.

use clap::{Parser, Subcommand};
use imagestore::tokens::{generate_token, SqliteTokenStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imagestore-token", about = "imagestore API token tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new token and print it once
    Generate {
        #[arg(long, default_value = "imagestore.yaml")]
        config: PathBuf,
        #[arg(long)]
        db: Option<String>,
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Revoke tokens whose digest starts with the given hex prefix
    Revoke {
        #[arg(long, default_value = "imagestore.yaml")]
        config: PathBuf,
        #[arg(long)]
        db: Option<String>,
        hash_prefix: String,
    },
    /// List stored token digests
    List {
        #[arg(long, default_value = "imagestore.yaml")]
        config: PathBuf,
        #[arg(long)]
        db: Option<String>,
    },
}

/// Token database path from `--db`, else the config file, else the default.
fn resolve_db_path(config_path: &PathBuf, db: Option<String>) -> anyhow::Result<String> {
    if let Some(db) = db {
        return Ok(db);
    }
    if !config_path.exists() {
        return Ok(imagestore::config::Config::default().auth.database);
    }
    let config = imagestore::config::load_config(config_path)?;
    Ok(config.auth.database)
}

fn open_store(config: &PathBuf, db: Option<String>) -> anyhow::Result<SqliteTokenStore> {
    let path = resolve_db_path(config, db)?;
    if let Some(parent) = std::path::Path::new(&path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    SqliteTokenStore::new(&path)
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Generate { config, db, label } => run_generate(config, db, label),
        Commands::Revoke {
            config,
            db,
            hash_prefix,
        } => run_revoke(config, db, hash_prefix),
        Commands::List { config, db } => run_list(config, db),
    };
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_generate(config: PathBuf, db: Option<String>, label: String) -> anyhow::Result<()> {
    let store = open_store(&config, db)?;
    let token = generate_token();
    let record = store.insert_token(&token, &label)?;
    println!("{}", token);
    eprintln!(
        "Stored token {} ({}). It cannot be shown again.",
        &record.token_hash[..12],
        if label.is_empty() { "no label" } else { &label }
    );
    Ok(())
}

fn run_revoke(config: PathBuf, db: Option<String>, hash_prefix: String) -> anyhow::Result<()> {
    let store = open_store(&config, db)?;
    let revoked = store.revoke(&hash_prefix)?;
    eprintln!("Revoked {} token(s)", revoked);
    Ok(())
}

fn run_list(config: PathBuf, db: Option<String>) -> anyhow::Result<()> {
    let store = open_store(&config, db)?;
    for record in store.list_tokens()? {
        println!(
            "{}\t{}\t{}\t{}",
            record.token_hash,
            if record.active { "active" } else { "revoked" },
            record.created_at,
            record.label
        );
    }
    Ok(())
}
