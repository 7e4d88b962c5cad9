//! Liveness probes run before a profile is saved.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::{ConnectionProfile, Protocol};
use crate::error::{Error, Result};
use crate::transfer::ftp::FtpClient;
use crate::transfer::http::build_client;

/// Checks that a remote endpoint answers before it is registered.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync + fmt::Debug {
    /// Succeeds when the endpoint behind `profile` is reachable.
    async fn probe(&self, profile: &ConnectionProfile) -> Result<()>;
}

/// Probe that talks the endpoint's protocol over the network.
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    connect_timeout: Duration,
}

impl NetworkProbe {
    /// Create a probe whose connect attempts give up after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for NetworkProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl ConnectivityProbe for NetworkProbe {
    async fn probe(&self, profile: &ConnectionProfile) -> Result<()> {
        match profile.protocol {
            Protocol::Ftp => {
                let mut client =
                    FtpClient::connect(&profile.host, profile.port, self.connect_timeout).await?;
                client
                    .login(
                        profile.user.as_deref().unwrap_or("anonymous"),
                        profile.secret.as_deref().unwrap_or(""),
                    )
                    .await?;
                client.quit().await;
                Ok(())
            }
            Protocol::Http | Protocol::Https => {
                let client = build_client(profile, self.connect_timeout)?;
                let response = client.head(profile.base_url()).send().await?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(Error::Protocol(format!(
                        "HEAD {} returned {}",
                        profile.base_url(),
                        response.status()
                    )))
                }
            }
            Protocol::Sftp => {
                tracing::debug!(host = %profile.host, "SFTP endpoints are not probed");
                Ok(())
            }
        }
    }
}
