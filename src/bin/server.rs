//! Process entry point: load configuration, set up logging, serve.

use ragbridge::config::ServiceConfig;
use ragbridge::server::WebServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config_path = std::env::var("RAG_SERVICE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = ServiceConfig::load(&config_path).unwrap_or_else(|err| {
        eprintln!("failed to load configuration from {config_path}: {err}");
        std::process::exit(1);
    });

    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.logging.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("failed to open log file {path}: {e}"));
            subscriber.with_writer(file).with_ansi(false).init();
        }
        None => subscriber.init(),
    }

    tracing::info!("starting ragbridge server");
    WebServer::new(config).start().await
}
