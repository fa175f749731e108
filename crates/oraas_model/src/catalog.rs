//! Layer and application inventory with a host reverse index.
//!
//! The catalog is built once per simulation and owned by the environment.
//! Entry ids are dense indices; the `hosts` reverse index is the only
//! mutable part and is kept consistent with device-side stored sets through
//! the device storage API.

use crate::error::{Error, Result};
use crate::sampling::clipped_normal;
use crate::{AppId, DeviceId, LayerId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind tag of a container layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    /// Operating system base layer.
    Os,
    /// Device driver layer.
    Driver,
    /// Shared library layer.
    Library,
    /// Execution runtime layer.
    Execution,
    /// Compatibility shim layer.
    Compatible,
}

/// Kind tag of an application blob. Mirrors the three task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppKind {
    /// Batch processing service.
    Processing,
    /// Cloud-drive storage service.
    Storage,
    /// Desktop streaming service.
    Desktop,
}

/// A content-addressed portion of a container image.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Dense layer id.
    pub id: LayerId,
    /// Blob size in MB.
    pub size: f64,
    /// Layer kind.
    pub kind: LayerKind,
    hosts: BTreeSet<DeviceId>,
}

/// An application file set served by filestore workers.
#[derive(Debug, Clone)]
pub struct Application {
    /// Dense application id.
    pub id: AppId,
    /// Blob size in MB.
    pub size: f64,
    /// Application kind.
    pub kind: AppKind,
    /// Ordered environment layers the app runs on.
    pub env_layers: Vec<LayerId>,
    hosts: BTreeSet<DeviceId>,
}

impl Layer {
    /// Devices currently storing this layer.
    pub const fn hosts(&self) -> &BTreeSet<DeviceId> {
        &self.hosts
    }
}

impl Application {
    /// Devices currently storing this application.
    pub const fn hosts(&self) -> &BTreeSet<DeviceId> {
        &self.hosts
    }
}

/// Reference to either class of catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataId {
    /// A container layer.
    Layer(LayerId),
    /// An application blob.
    App(AppId),
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Layer(id) => write!(f, "layer {id}"),
            Self::App(id) => write!(f, "app {id}"),
        }
    }
}

/// Immutable layer/app inventory plus the mutable host reverse index.
#[derive(Debug, Clone)]
pub struct Catalog {
    layers: Vec<Layer>,
    apps: Vec<Application>,
    storage_marker: AppId,
}

// Fixed layer layout: 3 OS (100 MB), 5 driver (50/200/200/200/200),
// 8 library (50/200/200/200/100/100/100/100), 1 execution (10), 1 compatible
// (500). Id blocks below index into it.
const OS_BASE: LayerId = 0;
const DRIVER_BASE: LayerId = 3;
const LIBRARY_BASE: LayerId = 8;
const EXECUTION_BASE: LayerId = 16;
const COMPATIBLE_BASE: LayerId = 17;

impl Catalog {
    /// Builds the deterministic inventory. Per-app environment-layer picks
    /// and desktop app sizes come from `rng`.
    #[must_use]
    pub fn generate(rng: &mut ChaCha8Rng) -> Self {
        let mut layers = Vec::new();
        let mut push = |size: f64, kind: LayerKind| {
            let id = layers.len();
            layers.push(Layer {
                id,
                size,
                kind,
                hosts: BTreeSet::new(),
            });
        };

        for _ in 0..3 {
            push(100.0, LayerKind::Os);
        }
        push(50.0, LayerKind::Driver);
        for _ in 0..4 {
            push(200.0, LayerKind::Driver);
        }
        push(50.0, LayerKind::Library);
        for _ in 0..3 {
            push(200.0, LayerKind::Library);
        }
        for _ in 0..4 {
            push(100.0, LayerKind::Library);
        }
        push(10.0, LayerKind::Execution);
        push(500.0, LayerKind::Compatible);

        let mut apps = Vec::new();
        for _ in 0..30 {
            let id = apps.len();
            let env_layers = vec![
                OS_BASE + rng.gen_range(0..3),
                DRIVER_BASE + rng.gen_range(1..5),
                LIBRARY_BASE + rng.gen_range(4..8),
            ];
            apps.push(Application {
                id,
                size: 500.0,
                kind: AppKind::Processing,
                env_layers,
                hosts: BTreeSet::new(),
            });
        }

        // The zero-size storage app marks the universal filestore capability.
        let storage_marker = apps.len();
        apps.push(Application {
            id: storage_marker,
            size: 0.0,
            kind: AppKind::Storage,
            env_layers: vec![OS_BASE, DRIVER_BASE, LIBRARY_BASE, EXECUTION_BASE],
            hosts: BTreeSet::new(),
        });

        for _ in 0..20 {
            let id = apps.len();
            let env_layers = vec![
                OS_BASE + 1,
                DRIVER_BASE + 1,
                LIBRARY_BASE + rng.gen_range(1..4),
                COMPATIBLE_BASE,
            ];
            apps.push(Application {
                id,
                size: clipped_normal(rng, 5000.0, 1000.0, 1.0),
                kind: AppKind::Desktop,
                env_layers,
                hosts: BTreeSet::new(),
            });
        }

        Self {
            layers,
            apps,
            storage_marker,
        }
    }

    /// Looks up a layer by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] for an unknown id.
    pub fn layer(&self, id: LayerId) -> Result<&Layer> {
        self.layers.get(id).ok_or(Error::OutOfRange {
            what: "layer id",
            value: id as i64,
        })
    }

    /// Looks up an application by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] for an unknown id.
    pub fn app(&self, id: AppId) -> Result<&Application> {
        self.apps.get(id).ok_or(Error::OutOfRange {
            what: "app id",
            value: id as i64,
        })
    }

    /// All layers, ordered by id.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// All applications, ordered by id.
    pub fn apps(&self) -> &[Application] {
        &self.apps
    }

    /// The distinguished zero-size storage capability marker.
    pub const fn storage_marker(&self) -> AppId {
        self.storage_marker
    }

    /// Size in MB of the referenced datum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] for an unknown id.
    pub fn size_of(&self, data: DataId) -> Result<f64> {
        match data {
            DataId::Layer(id) => Ok(self.layer(id)?.size),
            DataId::App(id) => Ok(self.app(id)?.size),
        }
    }

    /// A uniformly random layer, optionally restricted to one kind.
    #[must_use]
    pub fn arbitrary_layer(&self, rng: &mut ChaCha8Rng, kind: Option<LayerKind>) -> LayerId {
        match kind {
            None => rng.gen_range(0..self.layers.len()),
            Some(k) => {
                let ids: Vec<LayerId> = self
                    .layers
                    .iter()
                    .filter(|l| l.kind == k)
                    .map(|l| l.id)
                    .collect();
                ids[rng.gen_range(0..ids.len())]
            }
        }
    }

    /// A uniformly random application, optionally restricted to one kind.
    #[must_use]
    pub fn arbitrary_app(&self, rng: &mut ChaCha8Rng, kind: Option<AppKind>) -> AppId {
        match kind {
            None => rng.gen_range(0..self.apps.len()),
            Some(k) => {
                let ids: Vec<AppId> = self
                    .apps
                    .iter()
                    .filter(|a| a.kind == k)
                    .map(|a| a.id)
                    .collect();
                ids[rng.gen_range(0..ids.len())]
            }
        }
    }

    /// Id-wraparound successor within the same entry class. Used by the
    /// placement pass to probe the whole inventory without retrying forever.
    #[must_use]
    pub fn next_data(&self, data: DataId) -> DataId {
        match data {
            DataId::Layer(id) => DataId::Layer((id + 1) % self.layers.len()),
            DataId::App(id) => DataId::App((id + 1) % self.apps.len()),
        }
    }

    /// Devices hosting the referenced datum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] for an unknown id.
    pub fn hosts(&self, data: DataId) -> Result<&BTreeSet<DeviceId>> {
        match data {
            DataId::Layer(id) => Ok(self.layer(id)?.hosts()),
            DataId::App(id) => Ok(self.app(id)?.hosts()),
        }
    }

    /// Registers `host` as storing `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHost`] if already registered.
    pub fn add_host(&mut self, data: DataId, host: DeviceId) -> Result<()> {
        let hosts = self.hosts_mut(data)?;
        if !hosts.insert(host) {
            return Err(Error::DuplicateHost { data, host });
        }
        Ok(())
    }

    /// Removes `host` from the reverse index of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostNotFound`] if not registered.
    pub fn remove_host(&mut self, data: DataId, host: DeviceId) -> Result<()> {
        let hosts = self.hosts_mut(data)?;
        if !hosts.remove(&host) {
            return Err(Error::HostNotFound { data, host });
        }
        Ok(())
    }

    /// Empties every reverse index. Called when the device population is
    /// rebuilt and old host ids become meaningless.
    pub fn clear_hosts(&mut self) {
        for layer in &mut self.layers {
            layer.hosts.clear();
        }
        for app in &mut self.apps {
            app.hosts.clear();
        }
    }

    fn hosts_mut(&mut self, data: DataId) -> Result<&mut BTreeSet<DeviceId>> {
        match data {
            DataId::Layer(id) => self
                .layers
                .get_mut(id)
                .map(|l| &mut l.hosts)
                .ok_or(Error::OutOfRange {
                    what: "layer id",
                    value: id as i64,
                }),
            DataId::App(id) => self
                .apps
                .get_mut(id)
                .map(|a| &mut a.hosts)
                .ok_or(Error::OutOfRange {
                    what: "app id",
                    value: id as i64,
                }),
        }
    }
}
