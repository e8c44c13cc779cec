//! Entropy Coordinator binary entry point

use coordinator::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    coordinator::run(config).await
}
