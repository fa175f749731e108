//! Candidate generation for the three service-chain roles.
//!
//! Given the next task of the slot, this module picks the compute worker,
//! enumerates and ranks the filestore pool, chooses one depository per
//! missing layer, and assembles the observation. Any dead end turns into a
//! drop decision; the opportunistic cache variants get to seed data for
//! future requests before the drop.

use crate::config::{ModelFlags, SimSettings};
use crate::error::Result;
use crate::placement;
use oraas_model::catalog::DataId;
use oraas_model::{Catalog, Device, DeviceId, LayerId, Resource, Role, Task, TaskKind};
use oraas_net::Topology;
use oraas_policy::{CandidateLink, Observation};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Everything candidate generation may read or touch.
pub(crate) struct ComposeCtx<'a> {
    pub settings: &'a SimSettings,
    pub flags: ModelFlags,
    pub catalog: &'a mut Catalog,
    pub topology: &'a Topology,
    pub devices: &'a mut [Device],
    pub workers: &'a [DeviceId],
    pub rng: &'a mut ChaCha8Rng,
}

/// Outcome of candidate generation for one task.
pub(crate) enum Composition {
    /// The task cannot be composed; the caller emits the sentinel.
    Dropped,
    /// A full candidate set was found.
    Ready {
        /// Ranked filestore candidates, best first.
        candidates: Vec<DeviceId>,
        /// The observation reported to the scheduler.
        observation: Observation,
    },
}

/// Runs the full pipeline for one task, mutating its provider triple and
/// missing-layer capture in place.
pub(crate) fn compose_task(ctx: &mut ComposeCtx<'_>, task: &mut Task) -> Result<Composition> {
    let client = task.user_id;
    if task.bandwidth(Role::Compute) > ctx.devices[client].free_bw() {
        tracing::debug!(task = task.id, "client uplink cannot carry the stream");
        return Ok(Composition::Dropped);
    }

    let Some(compute) = select_compute(ctx, task)? else {
        if ctx.flags.opportunistic_cache {
            seed_edge_cache(ctx, task)?;
        }
        return Ok(Composition::Dropped);
    };
    task.set_provider(Role::Compute, compute);
    let Some(app_id) = task.app else {
        return Ok(Composition::Dropped);
    };
    task.missing_layers = ctx.devices[compute].missing_layers(ctx.catalog.app(app_id)?);

    if ctx.settings.public_data_deduplication
        && ctx.flags.layered_composition
        && task.kind == TaskKind::Storage
    {
        deduplicate_public_files(ctx, task, compute)?;
    }

    let mut pool = filestore_pool(ctx, task, compute)?;
    if pool.is_empty() {
        if ctx.settings.raas_cache {
            seed_filestore_cache(ctx, task)?;
        }
        return Ok(Composition::Dropped);
    }
    let total_candidates = pool.len();
    rank_by_access_bandwidth(ctx, &mut pool)?;
    pool.truncate(ctx.settings.candidates_num);

    for layer in task.missing_layers.clone() {
        let Some(host) = best_depository(ctx, layer, compute)? else {
            tracing::debug!(task = task.id, layer, "missing layer has no host");
            return Ok(Composition::Dropped);
        };
        task.set_provider(Role::Depository, host);
    }

    let mut candidates = Vec::with_capacity(pool.len());
    for &id in &pool {
        let line = ctx.topology.access_link(id)?;
        candidates.push(CandidateLink {
            bandwidth: line.free_bw(),
            latency: line.base_latency(),
            jitter: line.mean_jitter(),
        });
    }
    let compute_line = ctx.topology.access_link(compute)?;
    #[allow(clippy::cast_precision_loss)]
    let observation = Observation {
        task_info: vec![
            task.intrinsic_utility(),
            task.qos[1],
            task.qos[2],
            task.qos[3],
        ],
        worker_type: ctx.devices[compute].kind.worker_type() as f64,
        compute_bandwidth: compute_line.free_bw(),
        total_candidates,
        candidates,
    };

    Ok(Composition::Ready {
        candidates: pool,
        observation,
    })
}

/// Picks the compute worker minimising the first-byte + bulk proxy
/// `latency + mem / (speed + 1e6) * 1000` over the eligible pool.
fn select_compute(ctx: &mut ComposeCtx<'_>, task: &Task) -> Result<Option<DeviceId>> {
    let Some(app_id) = task.app else {
        return Ok(None);
    };
    let client = task.user_id;
    let client_area = ctx.topology.area_of(client)?;
    let area_limited =
        (ctx.settings.compute_at_edge || ctx.flags.area_restricted) && !ctx.flags.centralized;

    let mut best: Option<(f64, DeviceId)> = None;
    for &worker in ctx.workers {
        let device = &ctx.devices[worker];
        if worker == client || device.is_mobile || !device.is_open {
            continue;
        }
        if area_limited && ctx.topology.area_of(worker)? != client_area {
            continue;
        }
        if !ctx.flags.layered_composition
            && (!device.has_app(app_id) || task.mem > device.free(Resource::Mem))
        {
            continue;
        }
        if !device.check_task_availability(Role::Compute, task, ctx.catalog) {
            continue;
        }
        let speed = ctx.topology.link_speed(client, worker)?;
        if task.kind == TaskKind::Desktop && speed < task.bandwidth(Role::Compute) {
            continue;
        }
        let score =
            ctx.topology.link_latency(client, worker)? + task.mem / (speed + 1e6) * 1000.0;
        if best.map_or(true, |(current, _)| score < current) {
            best = Some((score, worker));
        }
    }
    Ok(best.map(|(_, id)| id))
}

/// Filestore pool for the chosen compute worker. Whole-app models serve
/// from the compute worker itself; layered models consult the app's hosts.
fn filestore_pool(
    ctx: &mut ComposeCtx<'_>,
    task: &Task,
    compute: DeviceId,
) -> Result<Vec<DeviceId>> {
    if !ctx.flags.layered_composition {
        let available =
            ctx.devices[compute].check_task_availability(Role::Filestore, task, ctx.catalog);
        return Ok(if available { vec![compute] } else { Vec::new() });
    }

    let Some(app_id) = task.app else {
        return Ok(Vec::new());
    };
    let hosts: Vec<DeviceId> = ctx.catalog.app(app_id)?.hosts().iter().copied().collect();
    let compute_area = ctx.topology.area_of(compute)?;
    let stream_need = task.bandwidth(Role::Compute) + task.bandwidth(Role::Filestore);

    let mut pool = Vec::new();
    for host in hosts {
        if ctx.flags.area_restricted && ctx.topology.area_of(host)? != compute_area {
            continue;
        }
        if !ctx.devices[host].check_task_availability(Role::Filestore, task, ctx.catalog) {
            continue;
        }
        if task.kind == TaskKind::Desktop
            && host != compute
            && ctx.topology.link_speed(compute, host)? < stream_need
        {
            continue;
        }
        pool.push(host);
    }
    Ok(pool)
}

/// Sorts candidates by access-line free bandwidth, widest first.
fn rank_by_access_bandwidth(ctx: &ComposeCtx<'_>, pool: &mut Vec<DeviceId>) -> Result<()> {
    let mut keyed: Vec<(f64, DeviceId)> = Vec::with_capacity(pool.len());
    for &id in pool.iter() {
        keyed.push((ctx.topology.access_link(id)?.free_bw(), id));
    }
    keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    *pool = keyed.into_iter().map(|(_, id)| id).collect();
    Ok(())
}

/// Earliest-available image source for one missing layer: minimises
/// `occupied_time + size / bottleneck * 1000` over the layer's hosts.
fn best_depository(
    ctx: &ComposeCtx<'_>,
    layer: LayerId,
    compute: DeviceId,
) -> Result<Option<DeviceId>> {
    let hosts: Vec<DeviceId> = ctx.catalog.layer(layer)?.hosts().iter().copied().collect();
    if hosts.is_empty() {
        return Ok(None);
    }
    let size = ctx.catalog.layer(layer)?.size;
    let compute_bw = ctx.topology.access_link(compute)?.free_bw();

    let mut best: Option<(f64, DeviceId)> = None;
    for host in hosts {
        let line = ctx.topology.access_link(host)?;
        let bottleneck = line.free_bw().min(compute_bw).max(1e-6);
        let score = line.occupied_time() + size / bottleneck * 1000.0;
        if best.map_or(true, |(current, _)| score < current) {
            best = Some((score, host));
        }
    }
    Ok(best.map(|(_, id)| id))
}

/// Drops files whose public id some in-scope worker already caches,
/// shrinking the upload volume accordingly.
fn deduplicate_public_files(
    ctx: &mut ComposeCtx<'_>,
    task: &mut Task,
    compute: DeviceId,
) -> Result<()> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let threshold = (100.0 * ctx.settings.public_data_rate) as u32;
    let compute_area = ctx.topology.area_of(compute)?;

    let mut scope: Vec<DeviceId> = Vec::new();
    for &worker in ctx.workers {
        if ctx.flags.area_restricted && ctx.topology.area_of(worker)? != compute_area {
            continue;
        }
        scope.push(worker);
    }

    let mut saved = 0.0;
    let devices = &*ctx.devices;
    task.files.retain(|file| {
        let cached = file.file_id < threshold
            && scope.iter().any(|&w| devices[w].has_public_file(file.file_id));
        if cached {
            saved += file.size;
        }
        !cached
    });
    if saved > 0.0 {
        task.mem -= saved;
        tracing::debug!(task = task.id, saved, "deduplicated public files");
    }
    Ok(())
}

/// Edge-cache fallback: the app and its missing layers land on a random
/// eligible in-area worker so a future request can be served locally.
fn seed_edge_cache(ctx: &mut ComposeCtx<'_>, task: &Task) -> Result<()> {
    let Some(app_id) = task.app else {
        return Ok(());
    };
    let client_area = ctx.topology.area_of(task.user_id)?;
    let mut eligible = Vec::new();
    for &worker in ctx.workers {
        let device = &ctx.devices[worker];
        if device.is_mobile || device.has_app(app_id) {
            continue;
        }
        if ctx.topology.area_of(worker)? != client_area {
            continue;
        }
        if placement::bundle_size(ctx.catalog, device, app_id) <= device.free(Resource::Mem) {
            eligible.push(worker);
        }
    }
    if eligible.is_empty() {
        return Ok(());
    }
    let target = eligible[ctx.rng.gen_range(0..eligible.len())];
    placement::store_bundle(ctx.catalog, &mut ctx.devices[target], app_id)?;
    tracing::debug!(app = app_id, device = target, "seeded edge cache");
    Ok(())
}

/// RaaS-cache fallback: the app alone lands on a random non-mobile worker
/// with room.
fn seed_filestore_cache(ctx: &mut ComposeCtx<'_>, task: &Task) -> Result<()> {
    let Some(app_id) = task.app else {
        return Ok(());
    };
    let size = ctx.catalog.app(app_id)?.size;
    let mut eligible = Vec::new();
    for &worker in ctx.workers {
        let device = &ctx.devices[worker];
        if !device.is_mobile && !device.has_app(app_id) && device.free(Resource::Mem) >= size {
            eligible.push(worker);
        }
    }
    if eligible.is_empty() {
        return Ok(());
    }
    let target = eligible[ctx.rng.gen_range(0..eligible.len())];
    ctx.devices[target].store_data(ctx.catalog, DataId::App(app_id))?;
    tracing::debug!(app = app_id, device = target, "seeded filestore cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CloudModel;
    use oraas_model::{DeviceKind, StoredFile};
    use rand::SeedableRng;

    struct World {
        settings: SimSettings,
        catalog: Catalog,
        topology: Topology,
        devices: Vec<Device>,
        workers: Vec<DeviceId>,
        rng: ChaCha8Rng,
    }

    /// One server (area 0) and one client (last area), storage marker on
    /// the server.
    fn small_world(settings: SimSettings) -> World {
        let mut rng = ChaCha8Rng::seed_from_u64(50);
        let mut catalog = Catalog::generate(&mut rng);
        let mut topology = Topology::new(settings.area_num, &mut rng);

        let mut server = Device::server(0, &mut rng);
        topology.add_device(&server, Some(0), &mut rng).unwrap();
        let marker = catalog.storage_marker();
        server
            .store_data(&mut catalog, DataId::App(marker))
            .unwrap();

        let client = Device::client(1, DeviceKind::Desktop, &mut rng);
        topology
            .add_device(&client, Some(settings.area_num - 1), &mut rng)
            .unwrap();

        World {
            settings,
            catalog,
            topology,
            devices: vec![server, client],
            workers: vec![0],
            rng,
        }
    }

    fn ctx(world: &mut World) -> ComposeCtx<'_> {
        ComposeCtx {
            settings: &world.settings,
            flags: world.settings.cloud_model.flags(),
            catalog: &mut world.catalog,
            topology: &world.topology,
            devices: &mut world.devices,
            workers: &world.workers,
            rng: &mut world.rng,
        }
    }

    fn storage_task(world: &mut World) -> Task {
        let mut task = Task::storage(0, 1, &mut world.rng);
        task.app = Some(world.catalog.storage_marker());
        task
    }

    #[test]
    fn storage_task_composes_in_the_open_model() {
        let mut world = small_world(SimSettings {
            cloud_model: CloudModel::OpenRaas,
            area_num: 2,
            ..SimSettings::default()
        });
        // The server caches three of the four marker env layers; the client
        // holds the fourth, so it must be chosen as the depository.
        for layer in [0, 3, 8] {
            world.devices[0]
                .store_data(&mut world.catalog, DataId::Layer(layer))
                .unwrap();
        }
        world.devices[1]
            .store_data(&mut world.catalog, DataId::Layer(16))
            .unwrap();

        let mut task = storage_task(&mut world);
        let composition = compose_task(&mut ctx(&mut world), &mut task).unwrap();

        let Composition::Ready {
            candidates,
            observation,
        } = composition
        else {
            panic!("storage task should compose");
        };
        assert_eq!(candidates, vec![0]);
        assert_eq!(task.providers.compute, Some(0));
        assert_eq!(observation.total_candidates, 1);
        assert_eq!(task.missing_layers, vec![16]);
        assert_eq!(task.providers.depositories, vec![1]);
    }

    #[test]
    fn unhosted_app_drops_under_center() {
        // The server hosts only the marker, so a task pinned to another app
        // finds an empty compute pool under whole-app placement.
        let mut world = small_world(SimSettings {
            cloud_model: CloudModel::Center,
            area_num: 2,
            ..SimSettings::default()
        });
        let mut task = storage_task(&mut world);
        task.app = Some(0);
        let composition = compose_task(&mut ctx(&mut world), &mut task).unwrap();
        assert!(matches!(composition, Composition::Dropped));
        assert!(task.providers.compute.is_none());
    }

    #[test]
    fn missing_layer_without_host_drops() {
        let mut world = small_world(SimSettings {
            cloud_model: CloudModel::CenterRaas,
            area_num: 2,
            ..SimSettings::default()
        });
        // Marker env layers have no hosts anywhere: depository lookup fails.
        let mut task = storage_task(&mut world);
        let composition = compose_task(&mut ctx(&mut world), &mut task).unwrap();
        assert!(matches!(composition, Composition::Dropped));
    }

    #[test]
    fn public_files_deduplicate_against_cached_workers() {
        let mut world = small_world(SimSettings {
            cloud_model: CloudModel::OpenRaas,
            area_num: 2,
            public_data_deduplication: true,
            public_data_rate: 0.5,
            ..SimSettings::default()
        });
        world.devices[0].cache_public_file(3);

        let mut task = storage_task(&mut world);
        task.files = vec![
            StoredFile {
                file_id: 3,
                size: 500.0,
            },
            StoredFile {
                file_id: 50,
                size: 500.0,
            },
        ];
        task.mem = 1000.0;

        let composition = compose_task(&mut ctx(&mut world), &mut task).unwrap();
        assert!(matches!(composition, Composition::Ready { .. }));
        // file 3 is public (< 50) and cached; file 50 is private.
        assert_eq!(task.files.len(), 1);
        assert_eq!(task.files[0].file_id, 50);
        assert!((task.mem - 500.0).abs() < 1e-9);
    }

    #[test]
    fn raas_cache_seeds_an_app_copy_on_failure() {
        let mut world = small_world(SimSettings {
            cloud_model: CloudModel::OpenRaas,
            area_num: 2,
            raas_cache: true,
            ..SimSettings::default()
        });
        // A process task whose app nobody hosts: compute is found (layered
        // models do not require hosting), the filestore pool is empty.
        let mut task = Task::process(0, 1, &mut world.rng);
        task.app = Some(0);
        // Give the server the env layers so compute selection succeeds
        // cheaply and the pool stays the only failure.
        let env_layers = world.catalog.app(0).unwrap().env_layers.clone();
        for layer in env_layers {
            world.devices[0]
                .store_data(&mut world.catalog, DataId::Layer(layer))
                .unwrap();
        }

        let composition = compose_task(&mut ctx(&mut world), &mut task).unwrap();
        assert!(matches!(composition, Composition::Dropped));
        assert!(world.devices[0].has_app(0), "app copy should be seeded");
    }

    #[test]
    fn desktop_task_needs_client_uplink() {
        let mut world = small_world(SimSettings {
            cloud_model: CloudModel::OpenRaas,
            area_num: 2,
            ..SimSettings::default()
        });
        let mut task = Task::desktop(0, 1, 5.0, &mut world.rng);
        task.app = Some(world.catalog.arbitrary_app(
            &mut world.rng,
            Some(oraas_model::AppKind::Desktop),
        ));
        world.devices[1].set_free_bw(0.0);
        let composition = compose_task(&mut ctx(&mut world), &mut task).unwrap();
        assert!(matches!(composition, Composition::Dropped));
    }
}
