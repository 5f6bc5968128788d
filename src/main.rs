use anyhow::Result;
use env_logger::Env;

use wellread::Config;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cfg = Config::from_env()?;
    wellread::run(cfg).await
}
