use {
    anyhow::Result,
    clap::Subcommand,
    parley_config::ParleyConfig,
    parley_sessions::{
        Address, STATE_KEY, SessionManager, SessionRecord, THREAD_KEY, ThreadRegistry,
    },
    serde_json::Value,
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// List stored sessions.
    List,
    /// Print one session record as JSON.
    Show { address: Address },
    /// Set one key in a stored record. VALUE is parsed as JSON, falling back
    /// to a plain string.
    Set {
        address: Address,
        key: String,
        value: String,
    },
    /// Wipe a session down to its address.
    Reset { address: Address },
    /// Remove a session record entirely.
    Delete { address: Address },
}

pub async fn init(config: &ParleyConfig) -> Result<()> {
    let manager = manager(config).await?;
    println!(
        "Session store ready: {}",
        config
            .store
            .url
            .clone()
            .unwrap_or_else(parley_sessions::store::default_store_url)
    );
    manager.shutdown().await;
    Ok(())
}

pub async fn handle_sessions(action: SessionAction, config: &ParleyConfig) -> Result<()> {
    let manager = manager(config).await?;
    let result = match action {
        SessionAction::List => list(&manager).await,
        SessionAction::Show { address } => show(&manager, &address).await,
        SessionAction::Set {
            address,
            key,
            value,
        } => set(&manager, &address, &key, &value).await,
        SessionAction::Reset { address } => reset(&manager, address).await,
        SessionAction::Delete { address } => delete(&manager, &address).await,
    };
    manager.shutdown().await;
    result
}

// The admin tool registers no threads, so thread hooks never run from here.
async fn manager(config: &ParleyConfig) -> Result<SessionManager> {
    Ok(SessionManager::from_config(config, ThreadRegistry::new()).await?)
}

async fn list(manager: &SessionManager) -> Result<()> {
    let records = manager.store().list().await?;
    if records.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }
    println!("{:<44} {:<16} {:<16} {:>12}", "ADDRESS", "THREAD", "STATE", "UPDATED");
    for record in &records {
        println!("{}", summary_line(record));
    }
    Ok(())
}

fn summary_line(record: &SessionRecord) -> String {
    let field = |key: &str| {
        record
            .data
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string()
    };
    let updated = record
        .timestamp()
        .map_or_else(|| "-".to_string(), |t| t.to_string());
    format!(
        "{:<44} {:<16} {:<16} {:>12}",
        record.address.as_str(),
        field(THREAD_KEY),
        field(STATE_KEY),
        updated
    )
}

async fn show(manager: &SessionManager, address: &Address) -> Result<()> {
    match manager.store().fetch(address).await? {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => println!("No session for {address}."),
    }
    Ok(())
}

async fn set(manager: &SessionManager, address: &Address, key: &str, raw: &str) -> Result<()> {
    let data = manager.patch(address, key, parse_value(raw)).await?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

async fn reset(manager: &SessionManager, address: Address) -> Result<()> {
    let mut session = manager.open(address).await;
    session.reset().await;
    session.sync().await;
    println!("Reset {}.", session.address());
    Ok(())
}

async fn delete(manager: &SessionManager, address: &Address) -> Result<()> {
    if manager.store().delete(address).await? {
        println!("Deleted {address}.");
    } else {
        println!("No session for {address}.");
    }
    Ok(())
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
