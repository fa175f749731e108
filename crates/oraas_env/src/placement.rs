//! Initial data distribution across servers and workers.
//!
//! Two branches, chosen by the cloud model's composition style:
//!
//! - **Layered**: every layer and app must land on at least one server,
//!   placed independently; workers are then enriched with random data
//! - **Whole-app**: apps are placed together with all of their env layers
//!   as one bundle, both in the server pass and in the enrichment pass
//!
//! Placement walks device ids forward from a random start so a crowded
//! server is skipped instead of retried forever.

use crate::error::{Error, Result};
use oraas_model::catalog::DataId;
use oraas_model::{Catalog, Device};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Upper bound (exclusive) of the per-worker enrichment draw count.
const ENRICH_DRAW_MAX: u64 = 19;

/// Runs the distribution pass for a freshly built device table. The first
/// `servers` entries of `devices` are the central servers.
pub fn distribute(
    catalog: &mut Catalog,
    devices: &mut [Device],
    servers: usize,
    layered: bool,
    rng: &mut ChaCha8Rng,
) -> Result<()> {
    // The zero-size storage marker is the universal filestore capability:
    // every non-mobile worker carries it in both branches.
    let marker = DataId::App(catalog.storage_marker());
    for device in devices.iter_mut() {
        if device.is_worker && !device.is_mobile {
            device.store_data(catalog, marker)?;
        }
    }

    if layered {
        distribute_layered(catalog, devices, servers, rng)?;
    } else {
        distribute_bundled(catalog, devices, servers, rng)?;
    }

    enrich_workers(catalog, devices, layered, rng);
    Ok(())
}

/// Layered branch: each layer, then each app, lands on some server.
fn distribute_layered(
    catalog: &mut Catalog,
    devices: &mut [Device],
    servers: usize,
    rng: &mut ChaCha8Rng,
) -> Result<()> {
    let marker = catalog.storage_marker();
    let data: Vec<DataId> = (0..catalog.layers().len())
        .map(DataId::Layer)
        .chain(
            (0..catalog.apps().len())
                .filter(|&id| id != marker)
                .map(DataId::App),
        )
        .collect();

    for datum in data {
        let origin = rng.gen_range(0..servers);
        let mut index = origin;
        loop {
            if devices[index].is_worker && devices[index].can_store(catalog, datum) {
                devices[index].store_data(catalog, datum)?;
                break;
            }
            index = (index + 1) % servers;
            if index == origin {
                return Err(Error::Unplaceable { data: datum });
            }
        }
    }
    Ok(())
}

/// Whole-app branch: each app lands on a server together with every env
/// layer that server is missing.
fn distribute_bundled(
    catalog: &mut Catalog,
    devices: &mut [Device],
    servers: usize,
    rng: &mut ChaCha8Rng,
) -> Result<()> {
    let marker = catalog.storage_marker();
    for app_id in 0..catalog.apps().len() {
        if app_id == marker {
            continue;
        }
        let origin = rng.gen_range(0..servers);
        let mut index = origin;
        loop {
            let device = &devices[index];
            if device.is_worker
                && !device.has_app(app_id)
                && bundle_size(catalog, device, app_id) <= device.free(oraas_model::Resource::Mem)
            {
                store_bundle(catalog, &mut devices[index], app_id)?;
                break;
            }
            index = (index + 1) % servers;
            if index == origin {
                return Err(Error::Unplaceable {
                    data: DataId::App(app_id),
                });
            }
        }
    }
    Ok(())
}

/// Enrichment pass: every flagged worker draws a handful of random data.
/// A draw that fits nowhere is simply skipped.
fn enrich_workers(
    catalog: &mut Catalog,
    devices: &mut [Device],
    layered: bool,
    rng: &mut ChaCha8Rng,
) {
    for index in 0..devices.len() {
        if !devices[index].is_worker {
            continue;
        }
        let draws = rng.gen_range(1..ENRICH_DRAW_MAX);
        for _ in 0..draws {
            if layered {
                enrich_one_layered(catalog, &mut devices[index], rng);
            } else {
                enrich_one_bundled(catalog, &mut devices[index], rng);
            }
        }
    }
}

/// One layered enrichment draw: an arbitrary layer (80%) or app (20%),
/// walking the inventory forward to find one this device can take. Falls
/// back to the other class once before giving up.
fn enrich_one_layered(catalog: &mut Catalog, device: &mut Device, rng: &mut ChaCha8Rng) {
    let mut pick_app = rng.gen_range(0..4) == 0;
    for _ in 0..2 {
        let origin = if pick_app {
            DataId::App(catalog.arbitrary_app(rng, None))
        } else {
            DataId::Layer(catalog.arbitrary_layer(rng, None))
        };
        let mut datum = origin;
        loop {
            if device.can_store(catalog, datum) {
                // can_store guarantees room and no duplicate host.
                let _ = device.store_data(catalog, datum);
                return;
            }
            datum = catalog.next_data(datum);
            if datum == origin {
                break;
            }
        }
        pick_app = !pick_app;
    }
}

/// One whole-app enrichment draw: an arbitrary app placed with its missing
/// env layers, walking the app inventory forward.
fn enrich_one_bundled(catalog: &mut Catalog, device: &mut Device, rng: &mut ChaCha8Rng) {
    let origin = catalog.arbitrary_app(rng, None);
    let mut app_id = origin;
    loop {
        if !device.has_app(app_id)
            && bundle_size(catalog, device, app_id) <= device.free(oraas_model::Resource::Mem)
        {
            let _ = store_bundle(catalog, device, app_id);
            return;
        }
        let DataId::App(next) = catalog.next_data(DataId::App(app_id)) else {
            unreachable!("next_data preserves the entry class");
        };
        app_id = next;
        if app_id == origin {
            return;
        }
    }
}

/// Memory needed to host `app` here: the app itself plus the env layers
/// this device is missing.
pub(crate) fn bundle_size(catalog: &Catalog, device: &Device, app_id: usize) -> f64 {
    let Ok(app) = catalog.app(app_id) else {
        return f64::INFINITY;
    };
    let mut size = app.size;
    for &layer in &app.env_layers {
        if !device.has_layer(layer) {
            size += catalog.layer(layer).map_or(f64::INFINITY, |l| l.size);
        }
    }
    size
}

/// Stores `app` plus its missing env layers.
pub(crate) fn store_bundle(catalog: &mut Catalog, device: &mut Device, app_id: usize) -> Result<()> {
    let layers = catalog.app(app_id)?.env_layers.clone();
    for layer in layers {
        if !device.has_layer(layer) {
            device.store_data(catalog, DataId::Layer(layer))?;
        }
    }
    device.store_data(catalog, DataId::App(app_id))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oraas_model::{Device, DeviceKind};
    use rand::SeedableRng;

    fn build(servers: usize, clients: usize, seed: u64) -> (Catalog, Vec<Device>, ChaCha8Rng) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let catalog = Catalog::generate(&mut rng);
        let mut devices: Vec<Device> = (0..servers).map(|i| Device::server(i, &mut rng)).collect();
        for i in 0..clients {
            devices.push(Device::client(servers + i, DeviceKind::Desktop, &mut rng));
        }
        (catalog, devices, rng)
    }

    #[test]
    fn layered_distribution_places_everything_on_servers() {
        let (mut catalog, mut devices, mut rng) = build(3, 5, 2);
        distribute(&mut catalog, &mut devices, 3, true, &mut rng).unwrap();

        for layer in catalog.layers() {
            assert!(
                layer.hosts().iter().any(|&h| h < 3),
                "layer {} has no server host",
                layer.id
            );
        }
        for app in catalog.apps() {
            assert!(
                !app.hosts().is_empty(),
                "app {} has no host at all",
                app.id
            );
        }
    }

    #[test]
    fn marker_lands_on_every_non_mobile_worker() {
        let (mut catalog, mut devices, mut rng) = build(2, 6, 3);
        for device in &mut devices[2..6] {
            device.is_worker = true;
        }
        distribute(&mut catalog, &mut devices, 2, true, &mut rng).unwrap();

        let marker = catalog.storage_marker();
        for device in &devices {
            if device.is_worker && !device.is_mobile {
                assert!(device.has_app(marker), "worker {} lacks the marker", device.id);
            }
        }
    }

    #[test]
    fn bundled_distribution_keeps_apps_runnable_in_place() {
        let (mut catalog, mut devices, mut rng) = build(3, 0, 4);
        distribute(&mut catalog, &mut devices, 3, false, &mut rng).unwrap();

        let marker = catalog.storage_marker();
        for app in catalog.apps() {
            if app.id == marker {
                continue;
            }
            for &host in app.hosts() {
                for &layer in &app.env_layers {
                    assert!(
                        devices[host].has_layer(layer),
                        "app {} on {} is missing layer {layer}",
                        app.id,
                        host
                    );
                }
            }
        }
    }

    #[test]
    fn no_eligible_server_is_unplaceable() {
        let (mut catalog, mut devices, mut rng) = build(1, 0, 5);
        devices[0].is_worker = false;
        let err = distribute(&mut catalog, &mut devices, 1, true, &mut rng);
        assert!(matches!(err, Err(Error::Unplaceable { .. })));
    }

    #[test]
    fn distribution_is_deterministic_per_seed() {
        let run = |seed| {
            let (mut catalog, mut devices, mut rng) = build(3, 8, seed);
            for device in &mut devices[3..7] {
                device.is_worker = true;
            }
            distribute(&mut catalog, &mut devices, 3, true, &mut rng).unwrap();
            devices
                .iter()
                .map(|d| (d.stored_layers().to_vec(), d.stored_apps().to_vec()))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(77), run(77));
        assert_ne!(run(77), run(78));
    }
}
