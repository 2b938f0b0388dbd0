use shortener::{config::AppConfig, init_server, observability::init_tracing};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/shortener.yaml".to_string());

    let config = match AppConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: shortener [config_file]");
            process::exit(1);
        }
    };

    init_tracing(config.server.log_format);

    if let Err(e) = init_server(config).await {
        tracing::error!(error = %e, "Shortener stopped");
        process::exit(1);
    }
}
