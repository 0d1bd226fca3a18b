//! OAuth login for the calendar providers. Client credentials and tokens are
//! kept in the OS keyring.

use assignsync_core::provider::oauth::{self, TokenStore};
use assignsync_core::provider::{keyring_store, oauth_config, KeyringTokenStore};
use assignsync_core::{Config, ProviderKind};
use clap::Subcommand;

use super::CmdResult;

#[derive(Subcommand)]
pub enum AuthAction {
    /// Authorize access to a calendar
    Login {
        /// google or microsoft (default: configured provider)
        #[arg(long, value_parser = parse_provider)]
        provider: Option<ProviderKind>,
        /// OAuth client ID; stored in the keyring
        #[arg(long)]
        client_id: Option<String>,
        /// OAuth client secret (Google only)
        #[arg(long)]
        client_secret: Option<String>,
    },
    /// Remove stored tokens
    Logout {
        #[arg(long, value_parser = parse_provider)]
        provider: Option<ProviderKind>,
    },
    /// Check authentication status
    Status {
        #[arg(long, value_parser = parse_provider)]
        provider: Option<ProviderKind>,
    },
}

fn parse_provider(raw: &str) -> Result<ProviderKind, String> {
    ProviderKind::parse(raw).ok_or_else(|| format!("unknown provider '{raw}' (google, microsoft)"))
}

pub async fn run(action: AuthAction) -> CmdResult {
    let config = Config::load()?;
    let store = KeyringTokenStore;
    match action {
        AuthAction::Login {
            provider,
            client_id,
            client_secret,
        } => {
            let kind = provider.unwrap_or(config.sync.provider);
            if kind == ProviderKind::Memory {
                println!("the memory calendar needs no login");
                return Ok(());
            }
            let service = kind.as_str();
            if let Some(id) = client_id {
                keyring_store::set(&keyring_store::credential_key(service, "client_id"), &id)?;
            }
            if let Some(secret) = client_secret {
                keyring_store::set(
                    &keyring_store::credential_key(service, "client_secret"),
                    &secret,
                )?;
            }
            let oauth = oauth_config(&config, kind)?;
            let http = reqwest::Client::new();
            oauth::authorize(&http, &oauth, &store, &|url| {
                eprintln!("Open this URL to authorize:\n{url}");
            })
            .await?;
            println!("{kind} authenticated");
        }
        AuthAction::Logout { provider } => {
            let kind = provider.unwrap_or(config.sync.provider);
            if kind != ProviderKind::Memory {
                store.clear(kind.as_str())?;
            }
            println!("{kind} disconnected");
        }
        AuthAction::Status { provider } => {
            let kind = provider.unwrap_or(config.sync.provider);
            let authenticated = kind == ProviderKind::Memory || store.load(kind.as_str())?.is_some();
            println!(
                "{kind}: {}",
                if authenticated {
                    "authenticated"
                } else {
                    "not authenticated"
                }
            );
        }
    }
    Ok(())
}
