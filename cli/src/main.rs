use clap::Parser;
use pgdesk_cli::BranchCli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pgdesk_cli::init_tracing();
    BranchCli::parse().run().await
}
