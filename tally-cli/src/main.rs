use anyhow::Result;
use tally_cli::app;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    app::run().await
}
