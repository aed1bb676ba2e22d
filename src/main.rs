//! Binary entrypoint for the `authgate` proxy.

use clap::Parser as _;

use authgate::cli::Cli;
use authgate::inner_main;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let invocation = Cli::parse();
    inner_main(invocation).await
}
