use anyhow::Result;

mod cli;
mod logging;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    cli::CliCommand::run_from_args().await
}
