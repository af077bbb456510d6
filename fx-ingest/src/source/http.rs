use std::{sync::OnceLock, time::Duration};

use tracing::debug;

use crate::Result;

const USER_AGENT: &str = concat!("fx-ingest/", env!("CARGO_PKG_VERSION"));

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate may have installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared HTTP client used by REST sources.
///
/// A zero `request_timeout` leaves reqwest's default (no timeout) in place.
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .pool_max_idle_per_host(4);

    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }

    Ok(builder.build()?)
}
