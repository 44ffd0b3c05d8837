//! Rosterlock state inspector.
//!
//! Prints the closed groups stored in a redb database: membership, polling
//! state, V2 key-pair history and V1 ratchet generations. Never writes.
//!
//! # Usage
//!
//! ```bash
//! # Every polled group
//! rosterlock-inspect --db groups.redb
//!
//! # One group by public key
//! rosterlock-inspect --db groups.redb --group 05ab...
//! ```

use std::path::PathBuf;

use clap::Parser;
use rosterlock_core::{
    GroupKeyStore, GroupPublicKey, RatchetGeneration, RatchetStore, RedbStorage, Storage,
    StorageError, ThreadStore, Transaction,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Rosterlock group state inspector
#[derive(Parser, Debug)]
#[command(name = "rosterlock-inspect")]
#[command(about = "Inspect closed-group state stored by rosterlock")]
#[command(version)]
struct Args {
    /// Path to the redb database
    #[arg(short, long)]
    db: PathBuf,

    /// Group public key (hex); defaults to every polled group
    #[arg(short, long)]
    group: Option<GroupPublicKey>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::debug!(db = %args.db.display(), "Opening database");
    let storage = RedbStorage::open(&args.db)?;
    // Dropped uncommitted: nothing is written back
    let txn = storage.begin()?;

    let groups = match args.group {
        Some(group) => vec![group],
        None => txn.polled_groups()?,
    };

    if groups.is_empty() {
        tracing::info!("No polled groups");
    }

    for group in groups {
        report(&txn, &group)?;
    }

    Ok(())
}

#[allow(clippy::print_stdout)]
fn report<T: Transaction>(txn: &T, group: &GroupPublicKey) -> Result<(), StorageError> {
    println!("group {group}");

    match txn.group_model(group)? {
        Some(model) => {
            println!("  thread    {}", model.group_id());
            println!("  name      {}", model.name());
            println!("  members   {}", model.members().len());
            for member in model.members() {
                let role = if model.is_admin(member) { " (admin)" } else { "" };
                println!("    {member}{role}");
            }
        },
        None => println!("  no thread"),
    }

    println!("  polling   {}", txn.is_polling(group)?);

    let history = txn.key_pairs(group)?;
    if !history.is_empty() {
        let active = txn.active_key_pair(group)?;
        println!("  key pairs {}", history.len());
        for key_pair in &history {
            let public = GroupPublicKey::from_bytes(*key_pair.public_key());
            let marker = if active.as_ref() == Some(key_pair) { " (active)" } else { "" };
            println!("    {public}{marker}");
        }
    }

    let current = txn.ratchets(group, RatchetGeneration::Current)?;
    let rotations = txn.rotation_count(group)?;
    if !current.is_empty() || rotations > 0 {
        println!("  private key {}", txn.group_private_key(group)?.is_some());
        println!("  ratchets  {}", current.len());
        for (sender, ratchet) in &current {
            println!("    {sender} at {}", ratchet.key_index());
        }
        for generation in txn.old_generations(group)? {
            println!(
                "  rotation  {} ({} ratchets)",
                generation.rotation,
                generation.ratchets.len()
            );
        }
    }

    Ok(())
}
