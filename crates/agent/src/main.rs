use flynn_agent::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::from_env();
    if let Err(e) = flynn_agent::bootstrap::run(config).await {
        tracing::error!(error = %e, "flynn-host exited with a fatal error");
        std::process::exit(1);
    }
}
