use std::{
    collections::BTreeMap,
    net::{Ipv4Addr, TcpListener as StdTcpListener},
    path::{Path, PathBuf},
};

use analyzer_framework_core::{constants::CONTAINER_SOURCE_MOUNT, provider::ProviderKind};
use tracing::{debug, info};

use crate::{detect::detect_providers, settings::ProviderSettings};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to scan input for languages: {source}")]
    Detection {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to allocate a port for the {kind} provider: {source}")]
    PortAllocation {
        kind: ProviderKind,
        #[source]
        source: std::io::Error,
    },
    #[error("{kind} provider already has container '{container}'")]
    AlreadyRunning {
        kind: ProviderKind,
        container: String,
    },
}

/// A claimed host port, guarded by an open socket until the container that
/// will own it is launched.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    guard: Option<StdTcpListener>,
}

impl PortReservation {
    /// Bind an OS-assigned ephemeral port on localhost.
    pub fn ephemeral() -> std::io::Result<Self> {
        let listener = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            port,
            guard: Some(listener),
        })
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Drop the guard socket so the runtime can bind the port.
    pub fn release(&mut self) {
        self.guard = None;
    }
}

/// One provider the run will start, or for builtin, serve in-process.
#[derive(Clone, Debug)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    /// Container image reference; empty for builtin.
    pub image: String,
    /// Host TCP port; 0 for builtin.
    pub port: u16,
    pub container_name: Option<String>,
    pub running: bool,
    pub input_mount_path: PathBuf,
}

/// Maps provider kinds to launch descriptors and holds their port
/// reservations until containers come up.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    descriptors: BTreeMap<ProviderKind, ProviderDescriptor>,
    reservations: BTreeMap<ProviderKind, PortReservation>,
}

impl ProviderRegistry {
    /// Build the registry from an explicit provider list, or detect providers
    /// from the input's language composition when the list is empty.
    pub fn discover(
        input: &Path,
        explicit: &[ProviderKind],
        settings: &ProviderSettings,
    ) -> Result<Self, RegistryError> {
        let kinds: Vec<ProviderKind> = if explicit.is_empty() {
            detect_providers(input)
                .map_err(|source| RegistryError::Detection { source })?
                .into_iter()
                .collect()
        } else {
            explicit.to_vec()
        };

        let mut registry = Self::default();
        for kind in kinds {
            let Some(image) = settings.image_for(kind) else {
                continue;
            };
            if registry.descriptors.contains_key(&kind) {
                continue;
            }
            let reservation = PortReservation::ephemeral()
                .map_err(|source| RegistryError::PortAllocation { kind, source })?;
            debug!(provider = %kind, port = reservation.port(), "reserved provider port");
            registry.descriptors.insert(
                kind,
                ProviderDescriptor {
                    kind,
                    image: image.to_owned(),
                    port: reservation.port(),
                    container_name: None,
                    running: false,
                    input_mount_path: PathBuf::from(CONTAINER_SOURCE_MOUNT),
                },
            );
            registry.reservations.insert(kind, reservation);
        }

        info!(
            providers = ?registry.kinds(),
            "provider registry assembled"
        );
        Ok(registry)
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.descriptors.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderDescriptor> {
        self.descriptors.get(&kind)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.descriptors.values()
    }

    /// Release the guard socket for a provider just before its container is
    /// started.
    pub fn release_port(&mut self, kind: ProviderKind) {
        if let Some(reservation) = self.reservations.get_mut(&kind) {
            reservation.release();
        }
    }

    /// Pin a provider to an externally chosen port, dropping our reservation.
    pub fn set_port(&mut self, kind: ProviderKind, port: u16) {
        if let Some(descriptor) = self.descriptors.get_mut(&kind) {
            descriptor.port = port;
            self.reservations.remove(&kind);
        }
    }

    /// Ports still guarded by our own reservation sockets.
    pub fn reserved_ports(&self) -> std::collections::BTreeSet<u16> {
        self.reservations
            .values()
            .map(PortReservation::port)
            .collect()
    }

    /// Record the launched container. Each provider gets at most one.
    pub fn mark_running(
        &mut self,
        kind: ProviderKind,
        container_name: String,
    ) -> Result<(), RegistryError> {
        let Some(descriptor) = self.descriptors.get_mut(&kind) else {
            return Ok(());
        };
        if descriptor.running {
            return Err(RegistryError::AlreadyRunning {
                kind,
                container: descriptor
                    .container_name
                    .clone()
                    .unwrap_or_else(|| container_name.clone()),
            });
        }
        descriptor.container_name = Some(container_name);
        descriptor.running = true;
        Ok(())
    }

    /// Names of every container recorded as running.
    pub fn running_containers(&self) -> Vec<String> {
        self.descriptors
            .values()
            .filter(|descriptor| descriptor.running)
            .filter_map(|descriptor| descriptor.container_name.clone())
            .collect()
    }
}
