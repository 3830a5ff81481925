use clap::Parser;
use infisical_config::cli::{Cli, Commands};
use infisical_config::config::{validate_options, SourceOptions};
use infisical_config::logging;
use infisical_config::{InfisicalSource, ProviderEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    match cli.command {
        Commands::Fetch(opts) => {
            let mut options = SourceOptions::load(opts.config.as_deref())?;
            options.optional |= opts.optional;
            options.reload_after_ms = None;

            let provider = InfisicalSource::from_options(options).build()?;
            provider.load().await?;

            let snapshot = provider.snapshot();
            let data = if opts.reveal {
                snapshot.as_map().clone()
            } else {
                snapshot.redacted()
            };
            let sorted: std::collections::BTreeMap<_, _> = data.into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&sorted)?);
            provider.dispose();
        }
        Commands::Watch(opts) => {
            let mut options = SourceOptions::load(opts.config.as_deref())?;
            if opts.interval_ms.is_some() {
                options.reload_after_ms = opts.interval_ms;
            }
            if options.reload_after_ms.is_none() {
                anyhow::bail!("watch needs a reload interval (--interval-ms or reloadAfterMs)");
            }

            let provider = InfisicalSource::from_options(options).build()?;
            let mut events = provider.subscribe();
            provider.load().await?;
            info!("Watching {} key(s), press Ctrl-C to stop", provider.snapshot().len());

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(ProviderEvent::Reloaded { generation, key_count }) => {
                            info!("Snapshot {} published with {} key(s)", generation, key_count);
                        }
                        Ok(ProviderEvent::RefreshFailed(err)) => {
                            error!("Reload failed: {}", err);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Missed {} reload event(s)", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            provider.dispose();
        }
        Commands::Check(opts) => {
            let options = SourceOptions::load(opts.config.as_deref())?;
            let errors = validate_options(&options);
            if errors.is_empty() {
                info!("Options are valid: {:?}", options.infisical);
            } else {
                for err in &errors {
                    error!("{}", err);
                }
                anyhow::bail!("{} invalid option(s)", errors.len());
            }
        }
        Commands::Version => {
            println!("infisical-config {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
