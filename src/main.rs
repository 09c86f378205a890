use sitewatch::cli::Cli;
use sitewatch::site::{Site, SiteLog, SiteLogLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let site_log = SiteLog::new();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(SiteLogLayer::new(site_log.clone()))
        .init();

    let cli = Cli::parse_args();
    let site = Site::new(site_log);
    match site.select_config(&cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(-1),
        Err(e) => {
            tracing::error!("init: {}", e);
            std::process::exit(-1);
        }
    }

    let base = site.base().await;
    if base != std::path::Path::new(".") {
        if base.exists() {
            if let Err(e) = std::env::set_current_dir(&base) {
                tracing::error!("Cannot enter site base {:?}: {}", base, e);
                std::process::exit(-1);
            }
        } else {
            tracing::error!("Path to site config does not exist");
            std::process::exit(-1);
        }
    }

    std::process::exit(site.run().await);
}
