mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use resilient_http::Error;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging as early as possible.
    logging::init_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("resilient-get error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let client = cli.client()?;

    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling the request");
            on_interrupt.cancel();
        }
    });

    match cli.request(&client, token).send().await {
        Ok(response) => {
            let status = response.status();
            let body = response
                .text()
                .await
                .context("failed to read the response body")?;
            println!("{}", body);
            tracing::debug!(status = status.as_u16(), "done");
            Ok(ExitCode::SUCCESS)
        }
        Err(Error::RetryExhausted(exhausted)) => {
            match exhausted.last_status() {
                Some(status) => eprintln!("resilient-get: giving up, last status {}", status),
                None => eprintln!("resilient-get: giving up, {}", exhausted),
            }
            Ok(ExitCode::FAILURE)
        }
        Err(Error::Cancelled) => {
            eprintln!("resilient-get: cancelled");
            Ok(ExitCode::from(130))
        }
        Err(err) => Err(err.into()),
    }
}
