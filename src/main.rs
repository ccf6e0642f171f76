use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use foia_coach::config::AppConfig;
use foia_coach::{
    ApiClient, ChatStore, CoachApi, CoachSession, ContextStore, JurisdictionsCache, Provider,
    Settings, SettingsStore, SettingsUpdate,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "foia-coach", author, version, about = "FOIA Coach command-line client")]
struct Cli {
    /// Print machine-readable JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask the coach a question
    Ask {
        question: String,
        /// Jurisdiction abbreviation, e.g. TX
        #[arg(short, long)]
        jurisdiction: Option<String>,
    },
    /// List known jurisdictions
    Jurisdictions {
        /// Bypass every cache and fetch again
        #[arg(long, default_value_t = false)]
        reload: bool,
        /// Forget the cached list and exit
        #[arg(long, default_value_t = false, conflicts_with = "reload")]
        clear: bool,
    },
    /// Show provider status reported by the service
    Status,
    /// Check that the service answers
    TestConnection,
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    Context {
        #[command(subcommand)]
        command: ContextCommand,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        api_url: Option<String>,
        #[arg(long, conflicts_with = "clear_token")]
        api_token: Option<String>,
        #[arg(long, default_value_t = false)]
        clear_token: bool,
        #[arg(long)]
        provider: Option<Provider>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        system_prompt: Option<String>,
    },
    Reset,
}

#[derive(Subcommand)]
enum ContextCommand {
    Show,
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = AppConfig::from_env()?;
    let storage = cfg.store.open().await?;
    tracing::debug!(store = ?cfg.store, "opened local storage");

    let settings = SettingsStore::load(storage.clone()).await;
    // Env overrides must never leak into persisted settings.
    if !matches!(cli.command, Command::Settings { .. }) {
        if let Some(update) = cfg.settings_override() {
            settings.override_for_session(update).await;
        }
    }

    let api: Arc<dyn CoachApi> =
        Arc::new(ApiClient::try_new(settings.clone(), cfg.request_timeout())?);

    match cli.command {
        Command::Ask {
            question,
            jurisdiction,
        } => {
            let context = ContextStore::load(storage.clone(), cfg.context_window).await;
            let session = CoachSession::new(api, settings, context, ChatStore::new());
            let jurisdiction = jurisdiction.map(|j| j.trim().to_ascii_uppercase());

            let response = session.ask(&question, jurisdiction.as_deref()).await?;
            if cli.json {
                print_json(&response)?;
            } else {
                println!("{}", response.answer);
                if !response.citations.is_empty() {
                    println!("\nSources:");
                    for citation in &response.citations {
                        match &citation.jurisdiction_abbr {
                            Some(abbr) => {
                                println!("  - {} [{}] ({})", citation.display_name, abbr, citation.source)
                            }
                            None => println!("  - {} ({})", citation.display_name, citation.source),
                        }
                    }
                }
            }
        }
        Command::Jurisdictions { reload, clear } => {
            let cache = JurisdictionsCache::new(api, storage.clone(), cfg.jurisdictions_ttl);
            if clear {
                cache.clear().await;
                if !cli.json {
                    println!("jurisdiction cache cleared");
                }
                return Ok(ExitCode::SUCCESS);
            }

            let list = cache.load(reload).await?;
            if cli.json {
                print_json(list.as_slice())?;
            } else {
                for j in list.iter() {
                    println!("{:>5}  {:<6} {:<8} {}", j.id, j.abbreviation, j.level, j.name);
                }
            }
        }
        Command::Status => {
            let status = api.get_provider_status().await?;
            if cli.json {
                print_json(&status)?;
            } else {
                println!("status:    {}", status.status);
                println!("provider:  {}", status.current_provider);
                println!("available: {}", status.available_providers.join(", "));
                println!(
                    "apis:      openai={} gemini={} mock={}",
                    status.api_status.openai, status.api_status.gemini, status.api_status.mock
                );
                if !status.message.is_empty() {
                    println!("{}", status.message);
                }
            }
        }
        Command::TestConnection => {
            let ok = api.test_connection().await;
            let url = settings.current().await.api_url;
            if cli.json {
                print_json(&serde_json::json!({ "api_url": url, "connected": ok }))?;
            } else if ok {
                println!("connected to {url}");
            } else {
                println!("could not reach {url}");
            }
            if !ok {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Settings { command } => {
            let shown = match command {
                SettingsCommand::Show => settings.current().await,
                SettingsCommand::Set {
                    api_url,
                    api_token,
                    clear_token,
                    provider,
                    model,
                    system_prompt,
                } => {
                    let api_token = if clear_token {
                        Some(None)
                    } else {
                        api_token.map(Some)
                    };
                    settings
                        .update(SettingsUpdate {
                            api_url,
                            api_token,
                            provider,
                            model,
                            system_prompt,
                        })
                        .await
                }
                SettingsCommand::Reset => settings.reset().await,
            };
            print_settings(&shown, cli.json)?;
        }
        Command::Context { command } => {
            let context = ContextStore::load(storage.clone(), cfg.context_window).await;
            match command {
                ContextCommand::Show => {
                    let window = context.get_context().await;
                    if cli.json {
                        print_json(&window)?;
                    } else {
                        if let Some(j) = &window.current_jurisdiction {
                            println!("jurisdiction: {j}");
                        }
                        for message in &window.messages {
                            println!("{:?}: {}", message.role, message.content);
                        }
                    }
                }
                ContextCommand::Clear => {
                    context.clear().await;
                    if !cli.json {
                        println!("conversation context cleared");
                    }
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_settings(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let mut masked = settings.clone();
    if let Some(token) = masked.api_token.as_mut() {
        *token = mask(token);
    }

    if json {
        return print_json(&masked);
    }

    println!("api_url:       {}", masked.api_url);
    println!("api_token:     {}", masked.api_token.as_deref().unwrap_or("(none)"));
    println!("provider:      {}", masked.provider);
    println!("model:         {}", masked.model);
    println!("system_prompt: {}", masked.system_prompt);
    Ok(())
}

fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}
