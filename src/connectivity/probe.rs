//! Reachability probes.

use async_trait::async_trait;

/// A lightweight "can we reach the internet" check.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns `true` when the probe target answered.
    async fn check(&self) -> bool;
}

/// HTTP HEAD against a well-known host.
///
/// Any answer below 500 counts as reachable; transport errors and timeouts do
/// not. The client's timeout bounds the probe.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        HttpProbe {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(e) => {
                log::trace!("Reachability probe to {} failed: {e}", self.url);
                false
            }
        }
    }
}
