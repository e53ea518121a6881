/*!
appstate CLI - inspect, migrate and clear stored workspace layout state.

Works on the local file transport: every session's document lives at
`<path>/user_<session>/appState`.
*/

use appstate_core::transport::local::{APP_STATE_HOLDER, USER_DIR_PREFIX};
use appstate_core::{
    create_manager_from_config, AppStateConfig, DocumentSource, LocalFileTransport,
    ProviderRegistry, SessionKey, StateDocument, StateTransport,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tabled::{Table, Tabled};
use tracing::{info, warn};

const DEFAULT_BASE_PATH: &str = "./appstate";

#[derive(Parser)]
#[command(name = "appstate")]
#[command(about = "CLI for stored workspace layout state")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base directory holding the per-session state files
    #[arg(short, long, global = true, env = "APPSTATE_PATH")]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions with stored state
    List,
    /// Print a session's state document
    Show {
        /// Session (workspace) identifier
        session: String,
    },
    /// List the components stored for a session
    Components {
        /// Session (workspace) identifier
        session: String,
    },
    /// Print the layout of one part stack
    Get {
        /// Session (workspace) identifier
        session: String,
        /// Perspective identifier
        #[arg(long)]
        perspective: String,
        /// Part stack key (e.g. NAVIGATION, EDITING)
        #[arg(long)]
        part_stack: String,
    },
    /// Move a session's state out of a legacy preferences file
    Migrate {
        /// Session (workspace) identifier
        session: String,
        /// JSON preferences file holding the legacy states
        #[arg(long)]
        preferences: PathBuf,
        /// Preference key the states are stored under
        #[arg(long)]
        key: Option<String>,
    },
    /// Delete a session's stored state
    Clear {
        /// Session (workspace) identifier
        session: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct SessionInfo {
    #[tabled(rename = "Session")]
    session: String,
    #[tabled(rename = "Components")]
    components: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Modified")]
    modified: String,
}

#[derive(Tabled)]
struct ComponentInfo {
    #[tabled(rename = "Component ID")]
    id: String,
    #[tabled(rename = "Size")]
    size: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let base = cli
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_PATH));

    match cli.command {
        Commands::List => list_sessions(&base).await?,
        Commands::Show { session } => show_state(&base, &session).await?,
        Commands::Components { session } => list_components(&base, &session).await?,
        Commands::Get {
            session,
            perspective,
            part_stack,
        } => get_part_stack(&base, &session, &perspective, &part_stack).await?,
        Commands::Migrate {
            session,
            preferences,
            key,
        } => migrate_session(&base, &session, preferences, key).await?,
        Commands::Clear { session, force } => clear_session(&base, &session, force).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn load_document(
    transport: &LocalFileTransport,
    session: &SessionKey,
) -> Result<Option<StateDocument>, anyhow::Error> {
    let json = transport.load(session).await?;
    if json.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(StateDocument::parse(&json)?))
}

async fn list_sessions(base: &Path) -> Result<(), anyhow::Error> {
    info!("Listing sessions under {}", base.display());

    if !base.exists() {
        println!("No state directory found at: {}", base.display());
        return Ok(());
    }

    let mut sessions = Vec::new();
    let mut entries = tokio::fs::read_dir(base).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(id) = name.strip_prefix(USER_DIR_PREFIX) else {
            continue;
        };
        let file_path = entry.path().join(APP_STATE_HOLDER);
        let Ok(meta) = tokio::fs::metadata(&file_path).await else {
            continue;
        };

        let components = match tokio::fs::read_to_string(&file_path).await {
            Ok(json) => match StateDocument::parse(&json) {
                Ok(doc) => doc.len().to_string(),
                Err(e) => {
                    warn!("Unreadable state in {}: {}", file_path.display(), e);
                    "invalid".to_string()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}", file_path.display(), e);
                "unknown".to_string()
            }
        };

        sessions.push(SessionInfo {
            session: id.to_string(),
            components,
            size: format_size(meta.len()),
            modified: meta
                .modified()
                .map(format_modified)
                .unwrap_or_else(|_| "Unknown".to_string()),
        });
    }

    if sessions.is_empty() {
        println!("No stored sessions found");
    } else {
        sessions.sort_by(|a, b| a.session.cmp(&b.session));
        let table = Table::new(sessions);
        println!("{table}");
    }

    Ok(())
}

async fn show_state(base: &Path, session: &str) -> Result<(), anyhow::Error> {
    let session = SessionKey::new(session)?;
    let transport = LocalFileTransport::with_base_dir(base);
    info!("Showing state: {}", transport.state_path(&session).display());

    match load_document(&transport, &session).await? {
        Some(doc) => println!("{}", serde_json::to_string_pretty(doc.as_map())?),
        None => println!("No stored state for session {session}"),
    }
    Ok(())
}

async fn list_components(base: &Path, session: &str) -> Result<(), anyhow::Error> {
    let session = SessionKey::new(session)?;
    let transport = LocalFileTransport::with_base_dir(base);

    let Some(doc) = load_document(&transport, &session).await? else {
        println!("No stored state for session {session}");
        return Ok(());
    };

    let mut components = Vec::with_capacity(doc.len());
    for (id, state) in doc.iter() {
        components.push(ComponentInfo {
            id: id.to_string(),
            size: format_size(serde_json::to_string(state)?.len() as u64),
        });
    }

    if components.is_empty() {
        println!("Session {session} has no components");
    } else {
        println!("{}", Table::new(components));
    }
    Ok(())
}

async fn get_part_stack(
    base: &Path,
    session: &str,
    perspective: &str,
    part_stack: &str,
) -> Result<(), anyhow::Error> {
    let session = SessionKey::new(session)?;
    let config = AppStateConfig::local_with_base(base);
    let mut manager = create_manager_from_config(config, session, ProviderRegistry::new())?;
    manager.read_state().await;

    match manager.get_state_in(perspective, part_stack) {
        Some(state) => {
            println!("{}", serde_json::to_string_pretty(state)?);
            Ok(())
        }
        None => Err(anyhow::anyhow!(
            "No state for part stack '{part_stack}' in perspective '{perspective}'"
        )),
    }
}

async fn migrate_session(
    base: &Path,
    session: &str,
    preferences: PathBuf,
    key: Option<String>,
) -> Result<(), anyhow::Error> {
    let session = SessionKey::new(session)?;
    let mut config = AppStateConfig::local_with_base(base).with_legacy_preferences(preferences);
    if let Some(key) = key {
        config.legacy_key = key;
    }

    let mut manager = create_manager_from_config(config, session.clone(), ProviderRegistry::new())?;
    manager.read_state().await;

    match manager.source() {
        Some(DocumentSource::Legacy) => {
            let stored = LocalFileTransport::with_base_dir(base).exists(&session).await;
            if stored {
                println!("✓ Migrated legacy state for session {session}");
            } else {
                return Err(anyhow::anyhow!(
                    "Read legacy state for session {session} but failed to store it"
                ));
            }
        }
        Some(DocumentSource::Transport) => {
            println!("Session {session} already has stored state, legacy copy left untouched");
        }
        _ => println!("No legacy state found for session {session}"),
    }
    Ok(())
}

async fn clear_session(base: &Path, session: &str, force: bool) -> Result<(), anyhow::Error> {
    let session = SessionKey::new(session)?;
    let transport = LocalFileTransport::with_base_dir(base);

    if !transport.exists(&session).await {
        println!("No stored state for session {session}");
        return Ok(());
    }

    if !force {
        print!("Are you sure you want to delete the state of session '{session}'? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    transport.delete(&session).await?;
    println!("✓ State of session {session} deleted");
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_modified(time: SystemTime) -> String {
    let local: chrono::DateTime<chrono::Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
