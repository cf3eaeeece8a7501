mod runtime;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gateway_auth::ResetCooldownFilter;
use gateway_history::HistoryFilter;
use tracing_subscriber::EnvFilter;

use runtime::Runtime;

#[derive(Debug, Parser)]
#[command(name = "gateway-cli", version, about = "Operator CLI for the credential gateway")]
struct Cli {
    #[arg(long, default_value = "gateway.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Inspect session memory.
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// Inspect and manage stored credentials.
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Inspect request history.
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
}

#[derive(Debug, Subcommand)]
enum MemoryCommands {
    /// Show the most recent events for a session.
    Tail {
        session: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Lexically search a session's event log.
    Search {
        session: String,
        query: String,
        #[arg(long)]
        max_snippets: Option<usize>,
    },
}

#[derive(Debug, Subcommand)]
enum AuthCommands {
    /// List every registered credential and its eligibility state.
    List,
    /// Clear quota/unavailable/retry state for matching credentials.
    ResetCooldown {
        #[arg(long)]
        auth_id: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryCommands {
    /// Print aggregate stats over all recorded requests.
    Stats {
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        errors_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let runtime = Runtime::load(&cli.config)?;

    match cli.command {
        Commands::Memory { command } => match command {
            MemoryCommands::Tail { session, limit } => {
                let events = runtime.event_log.read_event_tail(&session, limit)?;
                for event in events {
                    println!("[{}] {} {}: {}", event.ts, event.kind, event.role, event.text);
                }
            }
            MemoryCommands::Search { session, query, max_snippets } => {
                let snippets = runtime.event_log.search(&session, &query, None, max_snippets)?;
                if snippets.is_empty() {
                    println!("no matches for '{query}' in session '{session}'");
                }
                for (i, snippet) in snippets.iter().enumerate() {
                    println!("{}. {}", i + 1, snippet);
                }
            }
        },
        Commands::Auth { command } => match command {
            AuthCommands::List => {
                let auths = runtime.auth_registry.list();
                println!("── credentials ──────────────────────────────────────");
                for auth in auths {
                    let eligible = auth.is_eligible(&auth.provider, "*", chrono::Utc::now());
                    println!(
                        "  {:<20} provider={:<12} priority={:<4} disabled={} unavailable={} eligible={}",
                        auth.id, auth.provider, auth.priority, auth.disabled, auth.unavailable, eligible
                    );
                }
            }
            AuthCommands::ResetCooldown { auth_id, provider, model } => {
                let filter = ResetCooldownFilter { auth_id, provider, model };
                let count = runtime.auth_registry.reset_cooldown(&filter)?;
                println!("reset cooldown on {count} credential(s)");
            }
        },
        Commands::History { command } => match command {
            HistoryCommands::Stats { provider, errors_only } => {
                let filter = HistoryFilter { provider, errors_only, ..Default::default() };
                let stats = runtime.history.get_stats(&filter)?;
                println!("── request history stats ────────────────────────────");
                println!("  count:        {}", stats.count);
                println!("  errors:       {}", stats.error_count);
                println!("  input tokens: {}", stats.total_input_tokens);
                println!("  output tokens:{}", stats.total_output_tokens);
                println!("  avg duration: {:.1}ms", stats.avg_duration_ms);
            }
        },
    }

    Ok(())
}
