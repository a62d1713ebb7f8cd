//! Anima agent runner.
//!
//! Usage:
//!   anima --config anima.toml --once
//!   anima --config anima.toml --post "slow mornings"
//!   anima --config anima.toml --interval-mins 120
//!   anima --observe --once  # decide and generate, never publish
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY` - language model and embedding key
//! - `THREADS_ACCESS_TOKEN` - platform access token
//! - `QDRANT_API_KEY` - vector store key
//! - `RUST_LOG` - log filter (default: `info,anima=debug`)

use std::time::Duration;

use anima_agent::{AgentConfig, SharedAgent, build_controller};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_INTERVAL_MINS: u64 = 240;

enum Mode {
    Once,
    Post(Option<String>),
    Loop,
}

fn print_help() {
    println!("Anima persona agent");
    println!();
    println!("Usage: anima [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <FILE>        Path to config TOML file");
    println!("      --once                 Run a single interaction cycle and exit");
    println!("      --post [TOPIC]         Publish one original post and exit");
    println!("      --observe              Never publish (observation mode)");
    println!("  -i, --interval-mins <N>    Minutes between cycles (default: 240)");
    println!("  -h, --help                 Show this help message");
    println!();
    println!("Environment variables:");
    println!("  OPENAI_API_KEY             Language model and embedding key");
    println!("  THREADS_ACCESS_TOKEN       Platform access token");
    println!("  QDRANT_API_KEY             Vector store key");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,anima=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<String> = None;
    let mut mode = Mode::Loop;
    let mut observe = false;
    let mut interval_mins = DEFAULT_INTERVAL_MINS;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--once" => mode = Mode::Once,
            "--post" => {
                let topic = args.get(i + 1).filter(|a| !a.starts_with('-')).cloned();
                if topic.is_some() {
                    i += 1;
                }
                mode = Mode::Post(topic);
            }
            "--observe" => observe = true,
            "--interval-mins" | "-i" => {
                if i + 1 < args.len() {
                    interval_mins = args[i + 1]
                        .parse()
                        .map_err(|e| anyhow::anyhow!("Invalid --interval-mins: {e}"))?;
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => tracing::warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = if let Some(path) = config_path {
        tracing::info!(path = %path, "Loading configuration");
        AgentConfig::from_file(&path)?
    } else {
        tracing::info!("Using default configuration");
        AgentConfig::default()
    };
    if observe {
        config.agent.observation_mode = true;
    }

    let agent = SharedAgent::new(build_controller(&config).await?);

    match mode {
        Mode::Once => {
            let results = agent.run_cycle(None).await;
            let successful = results.iter().filter(|r| r.success).count();
            println!("{successful}/{} interactions succeeded", results.len());
        }
        Mode::Post(topic) => match agent.create_original_post(topic.as_deref()).await {
            Some(id) => println!("Published post {id}"),
            None => println!("No post published"),
        },
        Mode::Loop => {
            let period = Duration::from_secs(interval_mins.max(1) * 60);
            tracing::info!(interval_mins, "Starting cycle loop");
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        agent.run_cycle(None).await;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutting down");
                        break;
                    }
                }
            }
        }
    }

    agent.close().await;
    Ok(())
}
