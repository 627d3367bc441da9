//! chime - hear when your AI chat finishes answering

mod config;
mod replay;

use anyhow::{Context, bail};
use chime_detect::Host;
use chime_notify::{Dispatcher, Notifier, Site};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, FileSettings, example_config};
use crate::replay::{DEFAULT_TAIL, DryRunNotifier, Replayer};

/// chime - answer-complete notifications for AI chat sites
#[derive(Parser, Debug)]
#[command(name = "chime")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed a recorded browser trace through the detector
    Replay {
        /// JSON-lines trace file
        trace: PathBuf,

        /// Print completions without playing sounds or posting webhooks
        #[arg(long)]
        dry_run: bool,

        /// Seconds to keep running after the last event
        #[arg(long, default_value_t = DEFAULT_TAIL.as_secs())]
        tail: u64,
    },

    /// Post a test message to a webhook (default: the configured one)
    TestWebhook {
        url: Option<String>,
    },

    /// Play the sound configured for a site
    TestSound {
        /// Site key or hostname
        #[arg(default_value = "chatgpt.com")]
        site: String,
    },

    /// Initialize config file
    InitConfig,

    /// Show the config file location and effective settings
    Config,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "chime=debug,chime_detect=debug,chime_notify=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load();

    // Setup tracing
    init_tracing(args.verbose || config.debug.unwrap_or(false));

    match args.command {
        Command::Replay {
            trace,
            dry_run,
            tail,
        } => run_replay(trace, dry_run, tail).await,
        Command::TestWebhook { url } => test_webhook(url, &config).await,
        Command::TestSound { site } => test_sound(&site, &config).await,
        Command::InitConfig => {
            match Config::init() {
                Ok(path) => {
                    println!("Config file created at: {}", path.display());
                    println!("\nExample config:\n{}", example_config());
                }
                Err(e) => {
                    eprintln!("Error creating config: {}", e);
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Command::Config => {
            let path = Config::config_path();
            let exists = if path.exists() { "" } else { " (not created)" };
            println!("Config file: {}{}\n", path.display(), exists);
            let settings = config.settings();
            println!("{}", toml::to_string_pretty(&Config::from(&settings))?);
            for (site, file) in settings.unknown_sounds() {
                eprintln!("Warning: unknown sound '{}' for {}", file, site);
            }
            Ok(())
        }
    }
}

async fn run_replay(trace: PathBuf, dry_run: bool, tail: u64) -> anyhow::Result<()> {
    let input = std::fs::read_to_string(&trace)
        .with_context(|| format!("Failed to read trace {}", trace.display()))?;
    let entries = replay::parse_trace(&input)?;

    let notifier: Arc<dyn Notifier> = if dry_run {
        Arc::new(DryRunNotifier)
    } else {
        Arc::new(Dispatcher::with_defaults())
    };
    let host = Host::new(Arc::new(FileSettings::new(Config::config_path())), notifier);
    host.start();

    println!("Replaying {} events from {}", entries.len(), trace.display());
    let events = Replayer::new(host)
        .run(entries, std::time::Duration::from_secs(tail))
        .await?;

    for event in &events {
        println!("{}", event);
    }
    let completions = events
        .iter()
        .filter(|e| matches!(e.event, chime_detect::HostEvent::Notified { .. }))
        .count();
    println!("{} completion(s)", completions);
    Ok(())
}

async fn test_webhook(url: Option<String>, config: &Config) -> anyhow::Result<()> {
    let url = match url.or_else(|| config.webhook.url.clone()) {
        Some(url) if !url.is_empty() => url,
        _ => bail!("No webhook URL given and none configured"),
    };
    let result = Dispatcher::with_defaults().test_webhook(&url).await;
    if result.ok {
        println!("Webhook OK (HTTP {})", result.status.unwrap_or_default());
        Ok(())
    } else {
        bail!(
            "Webhook test failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}

async fn test_sound(site: &str, config: &Config) -> anyhow::Result<()> {
    let site = Site::from_key(site)
        .or_else(|| chime_detect::SiteAdapter::for_hostname(site).map(|a| a.site()))
        .with_context(|| format!("Unknown site '{}'", site))?;
    let settings = config.settings();
    match Dispatcher::with_defaults().test_sound(site.key(), &settings)? {
        Some(file) => {
            println!("Playing {} for {}", file, site.label());
            // playback runs on its own thread; let it finish before exiting
            #[cfg(feature = "audio")]
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
        None => println!("Sound disabled for {}", site.label()),
    }
    Ok(())
}
