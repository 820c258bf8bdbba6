//! Entrypoint shim for the `tackboard` binary.

use clap::Parser as _;
use eyre::Result;
use tackboard::{cli::Cli, inner_main};

#[tokio::main]
async fn main() -> Result<()> {
    let invocation = Cli::parse();
    inner_main(invocation).await
}
