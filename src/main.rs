use bnmp::cli;
use bnmp::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    cli::Cli::run().await
}
