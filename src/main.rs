//! OAuth Session - desktop sign-in and authenticated API access

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use oauth_session::{
    api::ApiClientSettings,
    cli::{Cli, Command},
    config::Config,
    platform::{ConsoleNotifier, SystemBrowser},
    session::{FileSessionStore, SessionManager},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if matches!(cli.command, Command::Config) {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;
    let session = open_session(&config).await?;

    match cli.command {
        Command::Login => {
            let pair = session.sign_in().await.context("Sign-in failed")?;
            println!("✅ Signed in to {}", config.oauth.host);
            print_expiry(pair.expires_at);
        }
        Command::Refresh => {
            session.refresh().await.context("Refresh failed")?;
            println!("✅ Session refreshed");
            if let Some(pair) = session.current().await? {
                print_expiry(pair.expires_at);
            }
        }
        Command::Status => {
            println!("Host:    {}", config.oauth.host);
            println!("Client:  {}", config.oauth.client_id);
            println!("State:   {}", session.state());
            match session.current().await? {
                Some(pair) => {
                    print_expiry(pair.expires_at);
                    println!(
                        "Refresh: {}",
                        if pair.refresh_token().is_some() { "available" } else { "none" }
                    );
                }
                None => println!("No stored session. Run `oauth-session login`."),
            }
        }
        Command::Logout => {
            session.sign_out().await?;
            println!("✅ Signed out");
        }
        Command::Get {
            path,
            collection,
            await_consistency,
        } => {
            if config.api.base_url.is_empty() && !path.starts_with("http") {
                anyhow::bail!("api.base_url is not configured");
            }
            let client = session.api_client(ApiClientSettings::from(&config));
            let entities: Vec<serde_json::Value> = if await_consistency {
                client
                    .list_awaiting_consistency(&path, collection.as_deref())
                    .await?
            } else {
                client.list(&path, collection.as_deref()).await?
            };
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
        Command::Config => {}
    }

    Ok(())
}

async fn open_session(config: &Config) -> anyhow::Result<SessionManager> {
    let http_client = reqwest::Client::builder()
        .timeout(config.api.request_timeout)
        .user_agent(concat!("oauth-session/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let dir = config.storage.resolved_dir()?;
    let namespace = format!("{}|{}", config.oauth.host, config.oauth.client_id);
    let store = FileSessionStore::new(dir.clone(), namespace)?;
    info!(dir = %dir.display(), host = %config.oauth.host, "Opening session");

    let session = SessionManager::from_config(
        config,
        http_client,
        Arc::new(store),
        Arc::new(SystemBrowser),
        Arc::new(ConsoleNotifier),
    )
    .await?;
    Ok(session)
}

fn print_expiry(expires_at: Option<u64>) {
    let when = expires_at
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));
    match when {
        Some(at) => println!("Expires: {}", at.to_rfc3339()),
        None => println!("Expires: unknown"),
    }
}
