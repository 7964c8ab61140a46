use std::{
    path::Path,
    sync::{Arc, LazyLock},
};

use herald_common::{Signal, internal, logging, tracing};
use herald_delivery::{
    DeliveryConfig, DeliveryGateway, MemoryGateway, QueueProcessor, SmtpConfig, SmtpGateway,
};
use herald_store::StoreConfig;
use herald_tracing::traced;
use serde::Deserialize;
use tokio::sync::broadcast;

/// Top level configuration, read from `herald.config.ron`
///
/// ```ron
/// (
///     delivery: (
///         default_from: "news@example.org",
///         site_url: "https://example.org",
///     ),
///     smtp: Some((host: "smtp.example.org", username: Some("herald"), password: Some("secret"))),
///     store: Memory((capacity: Some(10000))),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Herald {
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Relay used for every outgoing message. Required unless `dry_run`.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,

    #[serde(default)]
    pub store: StoreConfig,

    /// Capture messages in memory instead of sending them
    #[serde(default)]
    pub dry_run: bool,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[traced(instrument(level = tracing::Level::TRACE))]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Herald {
    /// Read and parse a RON configuration file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or is not valid configuration.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Ok(ron::from_str(&content)?)
    }

    /// The gateway selected by this configuration.
    ///
    /// # Errors
    ///
    /// If `smtp` is missing outside a dry run, or the SMTP settings are
    /// invalid.
    pub fn gateway(&self) -> anyhow::Result<Arc<dyn DeliveryGateway>> {
        if self.dry_run {
            internal!(level = WARN, "Dry run: messages are captured, not sent");
            return Ok(Arc::new(MemoryGateway::new()));
        }

        let Some(smtp) = &self.smtp else {
            anyhow::bail!("An `smtp` section is required unless `dry_run` is set");
        };

        Ok(Arc::new(SmtpGateway::new(smtp)?))
    }

    /// Build the processor, with its queue and orchestrator, from this
    /// configuration.
    ///
    /// # Errors
    ///
    /// See [`gateway`](Self::gateway).
    pub fn processor(&self) -> anyhow::Result<QueueProcessor> {
        let gateway = self.gateway()?;
        let store = self.store.clone().into_store();

        Ok(QueueProcessor::new(self.delivery.clone(), store, gateway))
    }

    /// Run the processor until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// This function will return an error if the configuration cannot be
    /// turned into a running processor.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let processor = self.processor()?;
        internal!("Controller running");

        if let Err(e) = processor.test_connection().await {
            tracing::warn!("Gateway is not reachable yet: {e}");
        }

        let ret = tokio::select! {
            r = processor.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }
}
