//! Online/offline signal
//!
//! Consumers hold a `watch::Receiver<Connectivity>` and react to changes.
//! The terminal has no OS connectivity events. Instead a background task
//! reports whether the chat endpoint accepts TCP connections.

use reqwest::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn label(&self) -> &'static str {
        match self {
            Connectivity::Online => "online",
            Connectivity::Offline => "offline",
        }
    }

    /// Indicator color as RGB
    pub fn color(&self) -> (u8, u8, u8) {
        match self {
            Connectivity::Online => (0x93, 0xe6, 0xb8),
            Connectivity::Offline => (0xfc, 0xa5, 0xa5),
        }
    }

    pub fn is_online(&self) -> bool {
        *self == Connectivity::Online
    }
}

/// `host:port` the reachability check connects to, derived from the endpoint URL
pub fn reachability_address(endpoint: &str) -> Option<String> {
    let url = Url::parse(endpoint).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

pub async fn check_reachable(address: &str, timeout: Duration) -> Connectivity {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => Connectivity::Online,
        _ => Connectivity::Offline,
    }
}

/// Publish reachability transitions of `address` on a watch channel. Only
/// changes are sent, so receivers wake up on transitions alone.
pub fn spawn_reachability_watch(
    address: String,
    interval: Duration,
) -> (watch::Receiver<Connectivity>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(Connectivity::Offline);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let state = check_reachable(&address, interval).await;
            let changed = tx.send_if_modified(|current| {
                if *current != state {
                    *current = state;
                    true
                } else {
                    false
                }
            });
            if changed {
                info!(%address, status = state.label(), "connectivity changed");
            } else {
                debug!(%address, status = state.label(), "connectivity unchanged");
            }
            if tx.is_closed() {
                break;
            }
        }
    });
    (rx, handle)
}
