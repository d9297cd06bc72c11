use std::process::ExitCode;

use astral_storefront::config::StorefrontConfig;
use astral_storefront::error::AppResult;
use astral_storefront::functions;
use astral_storefront::utils::logger::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("astral-notify failed: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> AppResult<()> {
    let config = StorefrontConfig::load()?;
    init_logging(&config.log_dir())?;
    functions::serve(&config).await
}
