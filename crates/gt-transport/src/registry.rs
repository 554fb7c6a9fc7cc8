//! Machine registry: resolves machine names to shared transports.

use crate::{LocalTransport, SshTransport};
use async_trait::async_trait;
use gt_core::{Error, Machine, MachineKind, MachinesConfig, Result, Transport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Builds the transport for a machine. The registry calls it at most once per
/// machine name until the entry is evicted.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn build(&self, machine: &Machine) -> Result<Arc<dyn Transport>>;
}

/// Local machines get a [`LocalTransport`]; ssh and cloud machines get an
/// [`SshTransport`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn build(&self, machine: &Machine) -> Result<Arc<dyn Transport>> {
        match machine.kind {
            MachineKind::Local => Ok(Arc::new(LocalTransport::new())),
            MachineKind::Ssh(_) | MachineKind::Cloud(_) => {
                Ok(Arc::new(SshTransport::connect(machine).await?))
            }
        }
    }
}

type Slot = Arc<OnceCell<Arc<dyn Transport>>>;

pub struct MachineRegistry {
    config: RwLock<Arc<MachinesConfig>>,
    connections: Mutex<HashMap<String, Slot>>,
    factory: Arc<dyn TransportFactory>,
}

impl MachineRegistry {
    pub fn new(config: MachinesConfig) -> Self {
        Self::with_factory(config, Arc::new(DefaultTransportFactory))
    }

    pub fn with_factory(config: MachinesConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            connections: Mutex::new(HashMap::new()),
            factory,
        }
    }

    pub fn config(&self) -> Arc<MachinesConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn machine(&self, name: &str) -> Result<Machine> {
        self.config()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MachineNotFound(name.to_string()))
    }

    /// The shared transport for `name`, connecting on first use. Concurrent
    /// first callers wait on the same connection attempt. A failed attempt is
    /// not cached.
    pub async fn get_connection(&self, name: &str) -> Result<Arc<dyn Transport>> {
        let machine = self.machine(name)?;

        let slot = {
            let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
            connections.entry(name.to_string()).or_default().clone()
        };

        let transport = slot
            .get_or_try_init(|| async {
                info!(machine = %machine.name, kind = machine.kind_name(), "Connecting to machine");
                self.factory.build(&machine).await
            })
            .await?;
        Ok(transport.clone())
    }

    /// Forget the cached transport for `name`; the next lookup reconnects.
    pub fn evict(&self, name: &str) {
        let removed = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        if removed.is_some() {
            debug!(machine = %name, "Evicted cached connection");
        }
    }

    /// Replace the machine configuration and drop every cached transport.
    pub fn reload(&self, config: MachinesConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("Machine configuration reloaded");
    }
}
