use anyhow::Result;
use healthoracle::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real deployments use the environment.
    dotenvy::dotenv().ok();

    let action = cli::start()?;

    action.execute().await?;

    Ok(())
}
