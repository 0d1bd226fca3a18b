use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "assignsync", version, about = "Keep assignments in step with your calendar")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assignment management
    Assignment {
        #[command(subcommand)]
        action: commands::assignment::AssignmentAction,
    },
    /// Run sync passes and inspect their history
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Review and resolve sync conflicts
    Conflict {
        #[command(subcommand)]
        action: commands::conflict::ConflictAction,
    },
    /// Assignment <-> event links
    Mapping {
        #[command(subcommand)]
        action: commands::mapping::MappingAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Calendar provider authentication
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging() {
    let filter = EnvFilter::try_from_env("ASSIGNSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Assignment { action } => commands::assignment::run(action).await,
        Commands::Sync { action } => commands::sync::run(action).await,
        Commands::Conflict { action } => commands::conflict::run(action).await,
        Commands::Mapping { action } => commands::mapping::run(action).await,
        Commands::Config { action } => commands::config::run(action),
        Commands::Auth { action } => commands::auth::run(action).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "assignsync", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
