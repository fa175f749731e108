//! Device resource, storage, and role-task bookkeeping.
//!
//! A device is either a central server or a client (desktop, mobile, IoT).
//! Every device can take up to three microservice roles at once; each role
//! keeps its own task list and its own resource accounting. Stored layers
//! carry TTL timers that clients count down and servers never expire.

use crate::catalog::{Application, Catalog, DataId};
use crate::error::{Error, Result};
use crate::sampling::rounded_normal;
use crate::task::{Role, Task, TaskId, TaskKind};
use crate::{nearly_eq, AppId, DeviceId, FileId, LayerId, RESOURCE_EPS};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Layer cache lifetime on client devices, in slots.
pub const CLIENT_LAYER_TTL: i64 = 5;
/// Sentinel TTL for servers: never evict.
pub const SERVER_LAYER_TTL: i64 = -1;
/// Unit price ceiling applied when a resource is fully occupied.
const PRICE_CEILING: f64 = 1e6;

/// The four device populations of the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Central server with a wired line.
    Server,
    /// Desktop client.
    Desktop,
    /// Mobile client.
    Mobile,
    /// IoT client.
    Iot,
}

impl DeviceKind {
    /// Numeric worker-type tag reported in observations.
    pub const fn worker_type(self) -> usize {
        match self {
            Self::Server => 0,
            Self::Desktop => 1,
            Self::Mobile => 2,
            Self::Iot => 3,
        }
    }

    /// Servers are wired; every client population attaches wirelessly.
    pub const fn is_wired(self) -> bool {
        matches!(self, Self::Server)
    }

    /// Human-readable population label.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Desktop => "desktop",
            Self::Mobile => "mobile device",
            Self::Iot => "IoT device",
        }
    }
}

/// Resource axis of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resource {
    /// Computation, GFlops.
    Cpu,
    /// Storage space, MB.
    Mem,
    /// Interface bandwidth, MBps.
    Bw,
}

impl Resource {
    /// All three axes in fixed order.
    pub const ALL: [Self; 3] = [Self::Cpu, Self::Mem, Self::Bw];

    const fn index(self) -> usize {
        match self {
            Self::Cpu => 0,
            Self::Mem => 1,
            Self::Bw => 2,
        }
    }
}

/// A heterogeneous cloud device with three-role task bookkeeping.
#[derive(Debug, Clone)]
pub struct Device {
    /// Unique device id (index into the environment's device table).
    pub id: DeviceId,
    /// Device population.
    pub kind: DeviceKind,
    /// Whether the operating system is open to composition.
    pub is_open: bool,
    /// Whether the device is mobile (mobile devices never serve).
    pub is_mobile: bool,
    /// Whether the device participates in the serving worker set.
    pub is_worker: bool,
    /// Whether the device emits tasks.
    pub is_client: bool,
    /// Tasks generated this slot (clients only), drained by the environment.
    pub new_tasks: Vec<Task>,
    /// Committed tasks this client is paying for.
    pub req_tasks: Vec<TaskId>,
    capacity: [f64; 3],
    free: [f64; 3],
    price_coef: [f64; 3],
    default_ttl: i64,
    stored_layers: Vec<LayerId>,
    layer_ttl: Vec<i64>,
    stored_apps: Vec<AppId>,
    public_cache: BTreeSet<FileId>,
    role_tasks: [Vec<TaskId>; 3],
}

impl Device {
    fn new(
        id: DeviceId,
        kind: DeviceKind,
        capacity: [f64; 3],
        is_open: bool,
        is_mobile: bool,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let coef = |rng: &mut ChaCha8Rng| rng.gen_range(50..100) as f64 / 100.0;
        let price_coef = [coef(rng), coef(rng) / 1000.0, coef(rng)];
        let is_server = matches!(kind, DeviceKind::Server);
        Self {
            id,
            kind,
            is_open,
            is_mobile,
            is_worker: is_server,
            is_client: !is_server,
            new_tasks: Vec::new(),
            req_tasks: Vec::new(),
            capacity,
            free: capacity,
            price_coef,
            default_ttl: if is_server {
                SERVER_LAYER_TTL
            } else {
                CLIENT_LAYER_TTL
            },
            stored_layers: Vec::new(),
            layer_ttl: Vec::new(),
            stored_apps: Vec::new(),
            public_cache: BTreeSet::new(),
            role_tasks: [Vec::new(), Vec::new(), Vec::new()],
        }
    }

    /// Builds a central server: 50 GF, 1e6 MB, 125 MBps, open, fixed.
    #[must_use]
    pub fn server(id: DeviceId, rng: &mut ChaCha8Rng) -> Self {
        Self::new(
            id,
            DeviceKind::Server,
            [50.0, 1e6, 1e3 / 8.0],
            true,
            false,
            rng,
        )
    }

    /// Builds a client of the given population with sampled capacities.
    ///
    /// # Panics
    ///
    /// Panics if `kind` is [`DeviceKind::Server`]; servers have their own
    /// constructor.
    #[must_use]
    pub fn client(id: DeviceId, kind: DeviceKind, rng: &mut ChaCha8Rng) -> Self {
        let (capacity, is_open, is_mobile) = match kind {
            DeviceKind::Desktop => (
                [
                    rounded_normal(rng, 20.0, 5.0, 5.0),
                    rounded_normal(rng, 2e5, 2e5, 1e5),
                    rounded_normal(rng, 300.0, 70.0, 10.0) / 8.0,
                ],
                rng.gen_range(0..10) < 9,
                false,
            ),
            DeviceKind::Mobile => (
                [
                    rounded_normal(rng, 5.0, 3.0, 1.0),
                    rounded_normal(rng, 3e4, 3e4, 1e4),
                    rounded_normal(rng, 300.0, 70.0, 10.0) / 8.0,
                ],
                rng.gen_range(0..10) < 3,
                true,
            ),
            DeviceKind::Iot => (
                [
                    rounded_normal(rng, 5.0, 3.0, 1.0),
                    rounded_normal(rng, 1e4, 2e4, 1e4),
                    rounded_normal(rng, 100.0, 30.0, 10.0) / 8.0,
                ],
                rng.gen_range(0..10) < 9,
                rng.gen_range(0..10) < 3,
            ),
            DeviceKind::Server => panic!("servers are built with Device::server"),
        };
        Self::new(id, kind, capacity, is_open, is_mobile, rng)
    }

    /// Free amount of the given resource.
    #[must_use]
    pub const fn free(&self, resource: Resource) -> f64 {
        self.free[resource.index()]
    }

    /// Declared capacity of the given resource.
    #[must_use]
    pub const fn capacity(&self, resource: Resource) -> f64 {
        self.capacity[resource.index()]
    }

    /// Free interface bandwidth, mirrored against the access line.
    #[must_use]
    pub const fn free_bw(&self) -> f64 {
        self.free[2]
    }

    /// Overwrites the free-bandwidth mirror after a line-side change.
    pub fn set_free_bw(&mut self, value: f64) {
        self.free[2] = value;
    }

    /// Advances the layer cache by one slot: client TTLs tick down and
    /// expired layers are evicted (updating the catalog reverse index).
    /// Returns the evicted layer ids.
    ///
    /// # Errors
    ///
    /// Propagates catalog reverse-index errors, which indicate a
    /// stored-set/`hosts` inconsistency.
    pub fn begin_slot(&mut self, catalog: &mut Catalog) -> Result<Vec<LayerId>> {
        if !self.is_client {
            return Ok(Vec::new());
        }
        for ttl in &mut self.layer_ttl {
            if *ttl > 0 {
                *ttl -= 1;
            }
        }
        let expired: Vec<LayerId> = self
            .layer_ttl
            .iter()
            .zip(&self.stored_layers)
            .filter(|(ttl, _)| **ttl == 0)
            .map(|(_, layer)| *layer)
            .collect();
        for layer in &expired {
            tracing::debug!(device = self.id, layer, "evicting expired layer");
            self.remove_layer(catalog, *layer)?;
        }
        Ok(expired)
    }

    /// Whether the layer is currently stored here.
    #[must_use]
    pub fn has_layer(&self, layer: LayerId) -> bool {
        self.stored_layers.contains(&layer)
    }

    /// Whether the application is currently stored here.
    #[must_use]
    pub fn has_app(&self, app: AppId) -> bool {
        self.stored_apps.contains(&app)
    }

    /// Stored layer ids.
    #[must_use]
    pub fn stored_layers(&self) -> &[LayerId] {
        &self.stored_layers
    }

    /// Stored application ids.
    #[must_use]
    pub fn stored_apps(&self) -> &[AppId] {
        &self.stored_apps
    }

    /// Task ids currently held in the given role.
    #[must_use]
    pub const fn role_tasks(&self, role: Role) -> &Vec<TaskId> {
        &self.role_tasks[role.index()]
    }

    /// Pulls a layer into the local cache, or refreshes its TTL when it is
    /// already present. Returns `true` when the layer was newly fetched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientStorage`] when the layer does not fit.
    pub fn fetch_layer(&mut self, catalog: &mut Catalog, layer: LayerId) -> Result<bool> {
        if self.has_layer(layer) {
            self.refresh_layer_ttl(layer)?;
            return Ok(false);
        }
        let size = catalog.layer(layer)?.size;
        if self.free[1] < size {
            return Err(Error::InsufficientStorage {
                device: self.id,
                needed: size,
                free: self.free[1],
            });
        }
        self.stored_layers.push(layer);
        self.layer_ttl.push(self.default_ttl);
        self.free[1] -= size;
        catalog.add_host(DataId::Layer(layer), self.id)?;
        Ok(true)
    }

    /// Drops a layer from the local cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LayerNotFound`] when the layer is not stored here.
    pub fn remove_layer(&mut self, catalog: &mut Catalog, layer: LayerId) -> Result<()> {
        let index =
            self.stored_layers
                .iter()
                .position(|&l| l == layer)
                .ok_or(Error::LayerNotFound {
                    layer,
                    device: self.id,
                })?;
        self.stored_layers.remove(index);
        self.layer_ttl.remove(index);
        self.free[1] += catalog.layer(layer)?.size;
        catalog.remove_host(DataId::Layer(layer), self.id)?;
        Ok(())
    }

    /// Resets the TTL timer of a cached layer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LayerNotFound`] when the layer is not stored here.
    pub fn refresh_layer_ttl(&mut self, layer: LayerId) -> Result<()> {
        let index =
            self.stored_layers
                .iter()
                .position(|&l| l == layer)
                .ok_or(Error::LayerNotFound {
                    layer,
                    device: self.id,
                })?;
        self.layer_ttl[index] = self.default_ttl;
        Ok(())
    }

    /// Whether the datum fits into free memory and is not already hosted.
    #[must_use]
    pub fn can_store(&self, catalog: &Catalog, data: DataId) -> bool {
        let stored = match data {
            DataId::Layer(id) => self.has_layer(id),
            DataId::App(id) => self.has_app(id),
        };
        !stored && catalog.size_of(data).is_ok_and(|size| self.free[1] >= size)
    }

    /// Stores an application or layer, charging memory and maintaining the
    /// catalog reverse index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientStorage`] when the datum does not fit,
    /// or [`Error::DuplicateHost`] when it is already hosted here.
    pub fn store_data(&mut self, catalog: &mut Catalog, data: DataId) -> Result<()> {
        let size = catalog.size_of(data)?;
        if self.free[1] < size {
            return Err(Error::InsufficientStorage {
                device: self.id,
                needed: size,
                free: self.free[1],
            });
        }
        catalog.add_host(data, self.id)?;
        self.free[1] -= size;
        match data {
            DataId::App(id) => self.stored_apps.push(id),
            DataId::Layer(id) => {
                self.stored_layers.push(id);
                self.layer_ttl.push(self.default_ttl);
            }
        }
        Ok(())
    }

    /// Env layers of `app` that are not cached here.
    #[must_use]
    pub fn missing_layers(&self, app: &Application) -> Vec<LayerId> {
        app.env_layers
            .iter()
            .copied()
            .filter(|&l| !self.has_layer(l))
            .collect()
    }

    /// Registers a public file id as cached by this worker.
    pub fn cache_public_file(&mut self, file_id: FileId) {
        self.public_cache.insert(file_id);
    }

    /// Whether this worker caches the given public file id.
    #[must_use]
    pub fn has_public_file(&self, file_id: FileId) -> bool {
        self.public_cache.contains(&file_id)
    }

    /// Role-specific feasibility check for serving `task` here.
    #[must_use]
    pub fn check_task_availability(&self, role: Role, task: &Task, catalog: &Catalog) -> bool {
        // Desktop streams hold bandwidth for their whole span; check the
        // interface before anything else.
        if task.kind == TaskKind::Desktop {
            let needed = match role {
                Role::Compute => task.bandwidth(Role::Compute) + task.bandwidth(Role::Filestore),
                Role::Filestore if task.providers.compute != Some(self.id) => {
                    task.bandwidth(Role::Filestore)
                }
                _ => 0.0,
            };
            if needed > self.free[2] {
                return false;
            }
        }

        let Some(app_id) = task.app else {
            return false;
        };
        let Ok(app) = catalog.app(app_id) else {
            return false;
        };

        match role {
            Role::Compute => {
                if self.is_mobile || !self.is_open || task.cpu > self.free[0] {
                    return false;
                }
                let mut required = if task.kind == TaskKind::Storage {
                    0.0
                } else {
                    task.mem
                };
                for &layer in &app.env_layers {
                    if !self.has_layer(layer) {
                        required += catalog.layer(layer).map_or(f64::INFINITY, |l| l.size);
                    }
                }
                required <= self.free[1]
            }
            Role::Filestore => {
                if task.kind == TaskKind::Storage {
                    // The filestore ingests the user upload.
                    !self.is_mobile && task.mem <= self.free[1]
                } else {
                    self.has_app(app_id)
                }
            }
            Role::Depository => app.env_layers.iter().any(|&l| self.has_layer(l)),
        }
    }

    /// Commits `task` to this device in the given role, deducting resources
    /// and pulling or refreshing layers as required. Depository allocations
    /// pass the single layer this device will supply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] when a depository allocation is missing
    /// its layer, plus any layer-fetch error.
    pub fn allocate(
        &mut self,
        role: Role,
        task: &Task,
        catalog: &mut Catalog,
        dep_layer: Option<LayerId>,
    ) -> Result<()> {
        match role {
            Role::Compute => {
                self.free[0] -= task.cpu;
                if task.kind != TaskKind::Storage {
                    // In a storage task the compute worker only forwards
                    // user data.
                    self.free[1] -= task.mem;
                }
                let env_layers = catalog.app(task.app.ok_or(Error::OutOfRange {
                    what: "task app",
                    value: -1,
                })?)?
                    .env_layers
                    .clone();
                for layer in env_layers {
                    self.fetch_layer(catalog, layer)?;
                }
            }
            Role::Filestore => {
                if task.kind == TaskKind::Storage {
                    self.free[1] -= task.mem;
                }
            }
            Role::Depository => {
                let layer = dep_layer.ok_or(Error::OutOfRange {
                    what: "depository layer",
                    value: -1,
                })?;
                self.refresh_layer_ttl(layer)?;
            }
        }
        // One depository may supply several layers of the same task; the
        // task still appears at most once per role list.
        let list = &mut self.role_tasks[role.index()];
        if !list.contains(&task.id) {
            list.push(task.id);
        }
        Ok(())
    }

    /// Inverse of [`Device::allocate`]. Fetched layers stay cached and are
    /// reclaimed by TTL eviction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] when the task is not in the role
    /// list.
    pub fn release(&mut self, role: Role, task: &Task) -> Result<()> {
        let list = &mut self.role_tasks[role.index()];
        let index = list
            .iter()
            .position(|&id| id == task.id)
            .ok_or(Error::TaskNotFound {
                task: task.id,
                role,
                device: self.id,
            })?;
        list.remove(index);
        match role {
            Role::Compute => {
                self.free[0] += task.cpu;
                if task.kind != TaskKind::Storage {
                    self.free[1] += task.mem;
                }
            }
            Role::Filestore => {
                if task.kind == TaskKind::Storage {
                    self.free[1] += task.mem;
                }
            }
            Role::Depository => {}
        }
        Ok(())
    }

    /// Occupied fraction of a resource, in `[0, 1]`.
    #[must_use]
    pub fn occupied_fraction(&self, resource: Resource) -> f64 {
        1.0 - self.free(resource) / self.capacity(resource)
    }

    /// Dynamic unit price of a resource: the price coefficient divided by
    /// the free fraction, clipped at a large ceiling when fully used.
    #[must_use]
    pub fn unit_price(&self, resource: Resource) -> f64 {
        let free_fraction = 1.0 - self.occupied_fraction(resource);
        if free_fraction <= 0.0 {
            return PRICE_CEILING;
        }
        (self.price_coef[resource.index()] / free_fraction).min(PRICE_CEILING)
    }

    /// Reassembles capacity from free + committed + stored amounts and
    /// reports bookkeeping faults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalResource`] when a free count is negative or
    /// over capacity, [`Error::CapacityMismatch`] when reassembly disagrees
    /// with the declared capacity, and [`Error::TaskNotFound`] when a role
    /// list references an unknown task.
    pub fn check_error(
        &self,
        catalog: &Catalog,
        tasks: &HashMap<TaskId, &Task>,
    ) -> Result<()> {
        for resource in Resource::ALL {
            let free = self.free(resource);
            if free < -RESOURCE_EPS || free > self.capacity(resource) + RESOURCE_EPS {
                return Err(Error::IllegalResource {
                    device: self.id,
                    resource,
                    value: free,
                });
            }
        }

        let lookup = |id: TaskId, role: Role| {
            tasks.get(&id).copied().ok_or(Error::TaskNotFound {
                task: id,
                role,
                device: self.id,
            })
        };

        let mut cpu = self.free[0];
        let mut mem = self.free[1];
        let mut bw = self.free[2];

        for &id in &self.role_tasks[Role::Compute.index()] {
            let task = lookup(id, Role::Compute)?;
            cpu += task.cpu;
            if task.kind != TaskKind::Storage {
                mem += task.mem;
            }
            bw += task.bandwidth(Role::Compute);
            if task.providers.filestore != Some(self.id) {
                bw += task.bandwidth(Role::Filestore);
            }
        }
        for &id in &self.role_tasks[Role::Filestore.index()] {
            let task = lookup(id, Role::Filestore)?;
            if task.kind == TaskKind::Storage {
                mem += task.mem;
            }
            if task.providers.compute != Some(self.id) {
                bw += task.bandwidth(Role::Filestore);
            }
        }
        for &id in &self.req_tasks {
            let task = lookup(id, Role::Compute)?;
            bw += task.bandwidth(Role::Compute);
        }

        for &id in &self.stored_apps {
            mem += catalog.app(id)?.size;
        }
        for &id in &self.stored_layers {
            mem += catalog.layer(id)?.size;
        }

        for (resource, reassembled) in [
            (Resource::Cpu, cpu),
            (Resource::Mem, mem),
            (Resource::Bw, bw),
        ] {
            let capacity = self.capacity(resource);
            if !nearly_eq(reassembled, capacity) {
                return Err(Error::CapacityMismatch {
                    device: self.id,
                    resource,
                    reassembled,
                    capacity,
                });
            }
        }
        Ok(())
    }
}
