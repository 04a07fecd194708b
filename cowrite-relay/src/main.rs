use cowrite_collab::relay::{Relay, RelayConfig};
use log::info;

/// Overrides the relay bind address.
const ADDR_ENV: &str = "COWRITE_RELAY_ADDR";

fn config_from_env() -> RelayConfig {
    match std::env::var(ADDR_ENV) {
        Ok(addr) if !addr.trim().is_empty() => RelayConfig::with_bind_addr(addr.trim()),
        _ => RelayConfig::default(),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = config_from_env();
    info!(
        "Starting cowrite relay on {} (max {} clients)",
        config.bind_addr, config.max_clients
    );

    let relay = Relay::new(config);
    if let Err(e) = relay.run().await {
        log::error!("Relay stopped: {e}");
        std::process::exit(1);
    }
}
