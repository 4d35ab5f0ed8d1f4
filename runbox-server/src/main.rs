use std::env;
use std::path::PathBuf;

use runbox_server::config::Config;
use runbox_utils::tracing::setup_tracing;

use anyhow::Result;
use dotenv::dotenv;
use tracing::info;

const CONFIG_PATH: &str = "runbox.toml";

#[tracing::instrument(err)]
fn load_config() -> Result<()> {
    let path = match env::var_os("RUNBOX_CONFIG") {
        Some(p) => PathBuf::from(p),
        None => env::current_dir()?.join(CONFIG_PATH),
    };

    info!("loading config from {}", path.display());
    let config = Config::init_from_file(&path)?;
    info!("config is loaded:\n{:#?}", config);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    setup_tracing();

    load_config()?;
    runbox_server::run().await
}
