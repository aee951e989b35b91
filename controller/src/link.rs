//! Message passing between the UI side and the thread that owns the
//! settings store. The owner never blocks on the UI; it drains requests
//! between control ticks and answers each one over a oneshot reply.

use std::time::Duration;

use greenhouse_common::{
    block_device::BlockDevice,
    climate::ClimateOutputs,
    error::StoreError,
    record::SettingsRecord,
    rpc::SettingsCommand,
    store::SettingsStore,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
pub struct OwnerSnapshot {
    pub settings: SettingsRecord,
    #[serde(rename = "storeState")]
    pub store_state: &'static str,
    pub dirty: bool,
    #[serde(rename = "persistenceEnabled")]
    pub persistence_enabled: bool,
    #[serde(rename = "temperature")]
    pub temperature_c: Option<f32>,
    pub outputs: ClimateOutputs,
}

impl OwnerSnapshot {
    pub fn capture<D: BlockDevice>(
        store: &SettingsStore<D>,
        temperature_c: Option<f32>,
        outputs: ClimateOutputs,
    ) -> Self {
        Self {
            settings: store.get(),
            store_state: store.state().as_str(),
            dirty: store.is_dirty(),
            persistence_enabled: store.persistence_enabled(),
            temperature_c,
            outputs,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub applied: usize,
    pub rejected: Vec<String>,
}

pub enum SettingsRequest {
    Apply {
        commands: Vec<SettingsCommand>,
        reply: oneshot::Sender<(ApplyReport, OwnerSnapshot)>,
    },
    Snapshot {
        reply: oneshot::Sender<OwnerSnapshot>,
    },
    Reset {
        reply: oneshot::Sender<OwnerSnapshot>,
    },
    /// Write pending changes now instead of waiting out the debounce.
    Flush {
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
}

impl SettingsRequest {
    /// Runs the request against the owner's store and answers it. A caller
    /// that already gave up is not an error.
    pub fn serve<D: BlockDevice>(
        self,
        store: &mut SettingsStore<D>,
        now_ms: u64,
        temperature_c: Option<f32>,
        outputs: ClimateOutputs,
    ) {
        let delivered = match self {
            Self::Apply { commands, reply } => {
                let mut report = ApplyReport::default();
                for command in commands {
                    match command.apply(store, now_ms) {
                        Ok(()) => report.applied += 1,
                        Err(err) => {
                            warn!("settings call {} rejected: {err}", command.remote_name());
                            report.rejected.push(command.remote_name().to_string());
                        }
                    }
                }
                let snapshot = OwnerSnapshot::capture(store, temperature_c, outputs);
                reply.send((report, snapshot)).is_ok()
            }
            Self::Snapshot { reply } => reply
                .send(OwnerSnapshot::capture(store, temperature_c, outputs))
                .is_ok(),
            Self::Reset { reply } => {
                store.reset_to_defaults(now_ms);
                reply
                    .send(OwnerSnapshot::capture(store, temperature_c, outputs))
                    .is_ok()
            }
            Self::Flush { reply } => {
                let result = if store.is_dirty() && store.persistence_enabled() {
                    store.persist(now_ms).map(|()| true)
                } else {
                    Ok(false)
                };
                reply.send(result).is_ok()
            }
        };

        if !delivered {
            debug!("settings reply dropped, caller went away");
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("settings owner is not running")]
    OwnerGone,
    #[error("settings owner did not answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Clone)]
pub struct SettingsLink {
    tx: mpsc::Sender<SettingsRequest>,
    timeout: Duration,
}

impl SettingsLink {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn apply(
        &self,
        commands: Vec<SettingsCommand>,
    ) -> Result<(ApplyReport, OwnerSnapshot), LinkError> {
        self.call(|reply| SettingsRequest::Apply { commands, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<OwnerSnapshot, LinkError> {
        self.call(|reply| SettingsRequest::Snapshot { reply }).await
    }

    pub async fn reset(&self) -> Result<OwnerSnapshot, LinkError> {
        self.call(|reply| SettingsRequest::Reset { reply }).await
    }

    pub async fn flush(&self) -> Result<Result<bool, StoreError>, LinkError> {
        self.call(|reply| SettingsRequest::Flush { reply }).await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> SettingsRequest,
    ) -> Result<T, LinkError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(request(reply))
            .await
            .map_err(|_| LinkError::OwnerGone)?;

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(LinkError::OwnerGone),
            Err(_) => Err(LinkError::Timeout(self.timeout)),
        }
    }
}

/// Owner half. Polled without blocking from the control loop.
pub struct SettingsEndpoint {
    rx: mpsc::Receiver<SettingsRequest>,
}

impl SettingsEndpoint {
    pub fn try_next(&mut self) -> Option<SettingsRequest> {
        self.rx.try_recv().ok()
    }
}

pub fn channel(capacity: usize) -> (SettingsLink, SettingsEndpoint) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        SettingsLink {
            tx,
            timeout: REQUEST_TIMEOUT,
        },
        SettingsEndpoint { rx },
    )
}
