use std::sync::Arc;

use portal_scan_lib::api::HttpTransport;
use portal_scan_lib::classifier::relevance_label;
use portal_scan_lib::config::CheckerConfig;
use portal_scan_lib::session::{Portal, PortalSession, RequestTimeouts};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let mut args = std::env::args().skip(1);
    let (Some(endpoint), Some(identifier)) = (args.next(), args.next()) else {
        eprintln!("Usage: inspect_portal <endpoint> <identifier>");
        std::process::exit(2);
    };

    let config = CheckerConfig::load()?;
    let mut portal = PortalSession::new(
        Arc::new(HttpTransport::new()),
        &endpoint,
        &identifier,
        config.device.clone(),
        RequestTimeouts {
            handshake: config.handshake_timeout(),
            request: config.request_timeout(),
        },
    )
    .with_max_pages(config.max_pages_per_genre);

    println!("📡 Logging in to {} as {}", portal.base_url(), identifier);
    if let Err(e) = portal.login().await {
        println!("❌ {} ({})", e, e.status());
        return Ok(());
    }
    println!("✅ Login ok, token {}", portal.token().unwrap_or("-"));

    let genres = match portal.list_genres().await {
        Ok(genres) => genres,
        Err(e) => {
            println!("❌ {} ({})", e, e.status());
            return Ok(());
        }
    };
    println!("📄 {} genres:", genres.len());
    for genre in &genres {
        println!("  [{:>3}] {:<6} {}", relevance_label(&genre.name), genre.id, genre.name);
    }
    Ok(())
}
