use anyhow::Result;
use portier::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let action = cli::start()?;

    let outcome = action.execute().await;

    cli::telemetry::shutdown_tracer();

    outcome
}
