mod cli;
mod config;
mod decoder;
mod enrich;
mod error;
mod identity;
mod metadata;
mod plugin;
#[cfg(test)]
mod tests;
mod transport;
mod types;
mod utils;

use anyhow::Context;
use clap::Parser;
use futures::stream::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, error, info, warn};

use cli::Cli;
use config::PluginConfig;
use metadata::GceMetadataClient;
use plugin::{FlushStatus, OutputPlugin, StackdriverOutput};
use transport::{CloudLoggingClient, StdoutSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries dry-run entries, so diagnostics go to stderr
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = PluginConfig::load(&cli)?;
    let metadata = GceMetadataClient::new(config.metadata_host.as_deref(), config.request_timeout)
        .context("Failed to build metadata client")?;

    let input = BufReader::new(tokio::io::stdin());
    let shutdown = tokio::signal::ctrl_c();
    if cli.dry_run {
        let output = StackdriverOutput::new(config.clone(), metadata, StdoutSink::new());
        run(output, input, shutdown, &config).await
    } else {
        let sink = CloudLoggingClient::new(
            config.endpoint.clone(),
            config.log_name.clone(),
            config.request_timeout,
        );
        let output = StackdriverOutput::new(config.clone(), metadata, sink);
        run(output, input, shutdown, &config).await
    }
}

/// Drive the plugin lifecycle over newline-delimited events read from
/// `input` until EOF or until `shutdown` resolves.
async fn run<P, R, F>(
    mut output: P,
    input: R,
    shutdown: F,
    config: &PluginConfig,
) -> anyhow::Result<()>
where
    P: OutputPlugin,
    R: AsyncBufRead + Unpin,
    F: Future,
{
    let registration = P::register();
    info!(
        "Registered output plugin {}: {}",
        registration.name, registration.description
    );

    if let Err(e) = output.init().await {
        error!("Failed to initialize {}: {}", registration.name, e);
        return Err(e.into());
    }

    // raw byte lines; an undecodable line only invalidates its own batch
    let lines = SplitStream::new(input.split(b'\n'));
    let mut chunks = lines.ready_chunks(config.flush_size);
    tokio::pin!(shutdown);
    let mut failed_batches = 0usize;
    let mut read_error = None;

    loop {
        tokio::select! {
            chunk = chunks.next() => {
                let Some(lines) = chunk else {
                    debug!("Input closed");
                    break;
                };
                let mut data = Vec::new();
                for line in lines {
                    match line {
                        Ok(line) => {
                            data.extend_from_slice(&line);
                            data.push(b'\n');
                        }
                        Err(e) => {
                            read_error = Some(e);
                            break;
                        }
                    }
                }
                if !data.is_empty() {
                    let status = output.flush(&data, &config.tag).await;
                    if status != FlushStatus::Ok {
                        failed_batches += 1;
                        warn!("Batch for tag {} not delivered ({:?})", config.tag, status);
                    }
                }
                if read_error.is_some() {
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    output.exit().await;
    if failed_batches > 0 {
        warn!("{} batch(es) were not delivered", failed_batches);
    }
    match read_error {
        Some(e) => Err(anyhow::Error::new(e).context("Failed to read input")),
        None => Ok(()),
    }
}
