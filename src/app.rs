use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::HttpBackend;
use crate::config::InboxConfig;
use crate::console::{ConsoleInput, ConsoleView, HELP};
use crate::engine::{self, Command};
use crate::media::upload_from_path;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

pub async fn run() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = InboxConfig::from_env().context("loading inbox config")?;
    let backend = HttpBackend::new(
        &config.api_base_url,
        config.api_token.clone(),
        config.request_timeout,
    )?;
    info!(api = %config.api_base_url, "connecting inbox");

    let (handle, mut events, task) = engine::spawn(Arc::new(backend), config);
    let mut view = ConsoleView::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let input = match view.parse(&line) {
                    Ok(Some(input)) => input,
                    Ok(None) => continue,
                    Err(err) => {
                        println!("! {err}");
                        continue;
                    }
                };
                let command = match input {
                    ConsoleInput::Command(command) => command,
                    ConsoleInput::Attach { path, caption } => match upload_from_path(&path).await {
                        Ok(upload) => Command::SendAttachment { upload, caption },
                        Err(err) => {
                            println!("! cannot read {}: {err}", path.display());
                            continue;
                        }
                    },
                    ConsoleInput::Help => {
                        println!("{HELP}");
                        continue;
                    }
                    ConsoleInput::Quit => break,
                };
                if !handle.send(command) {
                    warn!("inbox engine is no longer running");
                    break;
                }
            }
            Some(event) = events.recv() => {
                for line in view.apply(event) {
                    println!("{line}");
                }
            }
        }
    }

    drop(handle);
    task.await.context("inbox engine task")?;
    Ok(())
}
