//! X11 Sealer - Main Application
//!
//! Seals a demo header template with the configured worker and prints the
//! sealed result.

use x11_sealer::{
    config::{Config, WorkerType},
    Agent, CoinAgeSnapshot, Engine, FixedCoinAge, Header, Result, SealOutcome, APP_NAME,
    APP_VERSION,
};

use num_bigint::BigUint;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load and validate configuration
    let config = Config::load().await?;

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: worker={}, threads={}, accelerator={}",
        config.worker, config.thread_count, config.accelerator_addr
    );

    let coinbase = config.coinbase()?;
    let chain = Arc::new(FixedCoinAge::new(CoinAgeSnapshot {
        balance: config.balance_value()?,
        coin_age: BigUint::from(0u8),
        prev_number: 0,
        prev_time: 0,
    }));
    let engine = Arc::new(Engine::new(config.seal_mode(), config.thread_count));

    let (results_tx, mut results_rx) = mpsc::channel::<Option<SealOutcome>>(16);
    let agent = Agent::new(engine.clone(), chain, results_tx);

    if config.worker == WorkerType::Accelerator {
        let (addr, _listener) = agent.bind_reply_listener(config.reply_addr()?).await?;
        info!("Accepting accelerator replies on {}", addr);
    }

    agent.start();

    let time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let template = Header {
        coinbase,
        number: 1,
        time,
        difficulty: config.difficulty_value()?,
        tx_count: 0,
        nonce: 0,
        mix_digest: [0u8; 32],
        coin_age: BigUint::from(0u8),
    };
    info!(
        "Sealing demo template: number={}, difficulty={}",
        template.number, template.difficulty
    );
    agent.submit_work(template);

    match results_rx.recv().await {
        Some(Some(outcome)) => {
            info!(
                "Sealed header {}: nonce={}, mix_digest=0x{}, coin_age={}",
                outcome.sealed.number,
                outcome.sealed.nonce,
                hex::encode(outcome.sealed.mix_digest),
                outcome.sealed.coin_age,
            );
        }
        Some(None) => {
            info!("Seal was superseded or failed; see the log above");
        }
        None => {}
    }

    agent.stop();
    Ok(())
}

/// Print the parsed configuration as YAML
fn print_configuration(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config)?;
    println!("{}", yaml);
    Ok(())
}
