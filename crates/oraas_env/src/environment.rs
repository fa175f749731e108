//! The per-slot simulation loop.

use crate::compose::{self, ComposeCtx, Composition};
use crate::config::{ModelFlags, SimSettings};
use crate::error::{Error, Result};
use crate::placement;
use crate::stats::{QosSample, SlotSnapshot};
use oraas_model::{
    Catalog, Device, DeviceId, DeviceKind, Resource, Role, Task, TaskId, TaskKind,
};
use oraas_net::Topology;
use oraas_policy::{Action, Observation, ObservationLayout};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeSet, HashMap};

/// Abort threshold for consecutive slots without a single emitted task.
const MAX_IDLE_SLOTS: usize = 10_000;

/// What one environment step hands back to the driver.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Observation for the next task (possibly the sentinel).
    pub observation: Vec<f64>,
    /// Reward earned by the committed task (0 for drops).
    pub reward: f64,
    /// Whether the step rolled over into a new slot.
    pub entered_new_slot: bool,
}

/// One isolated simulation: catalog, topology, devices, tasks, RNG.
#[derive(Debug)]
pub struct Environment {
    settings: SimSettings,
    flags: ModelFlags,
    layout: ObservationLayout,
    rng: ChaCha8Rng,
    catalog: Catalog,
    topology: Topology,
    devices: Vec<Device>,
    workers: Vec<DeviceId>,
    scheduled: Vec<Task>,
    new_tasks: Vec<Task>,
    fs_candidates: Vec<Vec<DeviceId>>,
    task_index: usize,
    served_num: usize,
    slot: u64,
    next_task_id: TaskId,
    qos_samples: Vec<QosSample>,
    last_slot: Option<SlotSnapshot>,
}

impl Environment {
    /// Builds an environment from a validated configuration. Call
    /// [`Environment::reset`] to start the first episode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for inconsistent settings.
    pub fn new(settings: SimSettings) -> Result<Self> {
        settings.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
        let catalog = Catalog::generate(&mut rng);
        let topology = Topology::new(settings.area_num, &mut rng);
        let flags = settings.cloud_model.flags();
        let layout = settings.layout();
        Ok(Self {
            settings,
            flags,
            layout,
            rng,
            catalog,
            topology,
            devices: Vec::new(),
            workers: Vec::new(),
            scheduled: Vec::new(),
            new_tasks: Vec::new(),
            fs_candidates: Vec::new(),
            task_index: 0,
            served_num: 0,
            slot: 0,
            next_task_id: 0,
            qos_samples: Vec::new(),
            last_slot: None,
        })
    }

    /// Starts a fresh episode: devices, topology, and data placement are
    /// rebuilt, then the first observation is produced.
    ///
    /// # Errors
    ///
    /// Propagates construction and placement failures
    /// ([`Error::Unplaceable`] in particular).
    pub fn reset(&mut self) -> Result<Vec<f64>> {
        self.scheduled.clear();
        self.new_tasks.clear();
        self.fs_candidates.clear();
        self.qos_samples.clear();
        self.last_slot = None;
        self.slot = 0;
        self.served_num = 0;
        self.task_index = 0;

        self.generate_topology()?;

        self.next()?;
        let mut idle = 0;
        while self.new_tasks.is_empty() {
            idle += 1;
            if idle > MAX_IDLE_SLOTS {
                return Err(Error::Starved(idle));
            }
            self.next()?;
        }
        self.get_state()
    }

    /// Applies the scheduler's decision for the current task, then advances
    /// to the next task (rolling into new slots as needed) and returns its
    /// observation.
    ///
    /// # Errors
    ///
    /// Propagates bookkeeping faults; [`Error::Policy`] for an action
    /// outside `[-1, candidates)`.
    pub fn step(&mut self, action: i64) -> Result<StepOutcome> {
        let reward = self.commit_current(action)?;

        self.task_index += 1;
        let mut entered_new_slot = false;
        let mut idle = 0;
        while self.task_index >= self.new_tasks.len() {
            self.next()?;
            entered_new_slot = true;
            if self.new_tasks.is_empty() {
                idle += 1;
                if idle > MAX_IDLE_SLOTS {
                    return Err(Error::Starved(idle));
                }
            }
        }

        let observation = self.get_state()?;
        Ok(StepOutcome {
            observation,
            reward,
            entered_new_slot,
        })
    }

    /// The settings this simulation runs under.
    pub const fn settings(&self) -> &SimSettings {
        &self.settings
    }

    /// The observation layout in force.
    pub const fn layout(&self) -> ObservationLayout {
        self.layout
    }

    /// Snapshot of the most recently finished slot, if statistics are on.
    pub const fn last_slot(&self) -> Option<&SlotSnapshot> {
        self.last_slot.as_ref()
    }

    /// Tasks emitted in the current slot.
    pub fn tasks_num(&self) -> usize {
        self.new_tasks.len()
    }

    /// Tasks served so far in the current slot.
    pub const fn served_num(&self) -> usize {
        self.served_num
    }

    /// Current slot number, counted from 1.
    pub const fn slot(&self) -> u64 {
        self.slot
    }

    /// The device table (read-only).
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// The serving worker set.
    pub fn workers(&self) -> &[DeviceId] {
        &self.workers
    }

    /// The catalog (read-only).
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The topology (read-only).
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Committed tasks currently in flight.
    pub fn scheduled(&self) -> &[Task] {
        &self.scheduled
    }

    /// Rebuilds devices, topology, and data placement for a new episode.
    fn generate_topology(&mut self) -> Result<()> {
        let m = self.settings.servers;
        let n = self.settings.clients;

        self.catalog.clear_hosts();
        self.topology = Topology::new(self.settings.area_num, &mut self.rng);
        self.devices.clear();
        self.workers.clear();

        for id in 0..m {
            let server = Device::server(id, &mut self.rng);
            let area = if self.flags.centralized { Some(0) } else { None };
            self.topology.add_device(&server, area, &mut self.rng)?;
            self.devices.push(server);
            self.workers.push(id);
        }

        for offset in 0..n {
            let id = m + offset;
            let kind = match self.rng.gen_range(0..3) {
                0 => DeviceKind::Desktop,
                1 => DeviceKind::Mobile,
                _ => DeviceKind::Iot,
            };
            let mut client = Device::client(id, kind, &mut self.rng);
            client.is_worker = self.rng.gen::<f64>() < self.settings.worker_rate;
            let area = if self.flags.centralized {
                Some(self.rng.gen_range(1..self.settings.area_num))
            } else {
                None
            };
            self.topology.add_device(&client, area, &mut self.rng)?;
            if self.flags.peer_workers && client.is_worker {
                self.workers.push(id);
            }
            self.devices.push(client);
        }

        self.topology.check_areas()?;
        placement::distribute(
            &mut self.catalog,
            &mut self.devices,
            m,
            self.flags.layered_composition,
            &mut self.rng,
        )?;

        tracing::debug!(
            servers = m,
            clients = n,
            workers = self.workers.len(),
            model = self.settings.cloud_model.label(),
            "topology generated"
        );
        Ok(())
    }

    /// Advances to the next slot: snapshot, device ticks and task emission,
    /// transient link reset, task aging and release, task collection.
    fn next(&mut self) -> Result<()> {
        if self.settings.debug_mode {
            self.check_workers()?;
        }

        if self.slot > 0 && self.settings.get_statistics {
            let snapshot = self.snapshot_slot();
            if self.settings.print_statistics_per_slot {
                tracing::info!(
                    slot = snapshot.slot,
                    served = snapshot.served_num,
                    tasks = snapshot.tasks_num,
                    worker_cpu = snapshot.worker_occupation[0],
                    "slot finished"
                );
            }
            self.last_slot = Some(snapshot);
        }

        self.new_tasks.clear();
        self.fs_candidates.clear();

        let kind = self.settings.task_kind()?;
        for index in 0..self.devices.len() {
            self.devices[index].begin_slot(&mut self.catalog)?;
            if self.devices[index].is_client {
                self.devices[index].new_tasks.clear();
                if self.rng.gen::<f64>() < self.settings.task_emit_prob {
                    let id = self.next_task_id;
                    self.next_task_id += 1;
                    let client_bw = self.devices[index].free_bw();
                    let task = Task::generate(id, kind, index, client_bw, &mut self.rng);
                    self.devices[index].new_tasks.push(task);
                }
            }
        }

        self.topology.step();

        let mut expired: Vec<TaskId> = Vec::new();
        for task in &mut self.scheduled {
            if task.age()? {
                expired.push(task.id);
            }
        }
        for id in expired {
            let Some(position) = self.scheduled.iter().position(|t| t.id == id) else {
                continue;
            };
            let task = self.scheduled.remove(position);
            self.release_task(&task)?;
        }

        for index in self.settings.servers..self.devices.len() {
            let drained: Vec<Task> = std::mem::take(&mut self.devices[index].new_tasks);
            for mut task in drained {
                if task.app.is_none() {
                    task.app = Some(
                        self.catalog
                            .arbitrary_app(&mut self.rng, Some(task.kind.app_kind())),
                    );
                }
                self.new_tasks.push(task);
            }
        }

        self.task_index = 0;
        self.served_num = 0;
        self.qos_samples.clear();
        self.slot += 1;
        Ok(())
    }

    /// Builds the observation for the current task, recording its filestore
    /// candidates. A drop decision yields the sentinel.
    fn get_state(&mut self) -> Result<Vec<f64>> {
        let index = self.task_index;
        debug_assert_eq!(self.fs_candidates.len(), index);
        let layout = self.layout;

        let composition = {
            let Self {
                ref settings,
                flags,
                ref mut catalog,
                ref topology,
                ref mut devices,
                ref workers,
                ref mut rng,
                ref mut new_tasks,
                ..
            } = *self;
            let task = &mut new_tasks[index];
            let mut ctx = ComposeCtx {
                settings,
                flags,
                catalog,
                topology,
                devices: devices.as_mut_slice(),
                workers: workers.as_slice(),
                rng,
            };
            compose::compose_task(&mut ctx, task)?
        };

        match composition {
            Composition::Dropped => {
                self.new_tasks[index].dropped = true;
                self.fs_candidates.push(Vec::new());
                Ok(Observation::sentinel(&layout))
            }
            Composition::Ready {
                candidates,
                observation,
            } => {
                self.fs_candidates.push(candidates);
                Ok(observation.flatten(&layout))
            }
        }
    }

    /// Commits the current task against the chosen filestore candidate, or
    /// drops it. Returns the reward.
    fn commit_current(&mut self, action: i64) -> Result<f64> {
        let index = self.task_index;
        let candidates = self
            .fs_candidates
            .get(index)
            .cloned()
            .unwrap_or_default();
        let decoded = Action::decode(action, candidates.len())?;

        if self.new_tasks[index].dropped {
            return Ok(0.0);
        }
        let Action::Select(choice) = decoded else {
            self.new_tasks[index].dropped = true;
            return Ok(0.0);
        };
        let filestore = candidates[choice];

        let mut task = self.new_tasks[index].clone();
        task.set_provider(Role::Filestore, filestore);
        if !task.is_fully_assigned() {
            return Err(Error::MissingProvider {
                task: task.id,
                role: Role::Depository,
            });
        }
        let client = task.user_id;
        let compute = task.providers.compute.ok_or(Error::MissingProvider {
            task: task.id,
            role: Role::Compute,
        })?;

        let uc = self.topology.link_state(client, compute, &mut self.rng)?;
        let cf = self.topology.link_state(compute, filestore, &mut self.rng)?;

        // Start-up delay: the last missing layer's arrival, reading the
        // transfer watermarks before this commit queues anything new.
        let mut start_delay = 0.0f64;
        for (&layer, &depository) in task.missing_layers.iter().zip(&task.providers.depositories)
        {
            let latency = self.topology.link_latency(compute, depository)?;
            let queued = self.topology.link_occupied_time(compute, depository)?;
            let transfer = self.topology.transmission_duration(
                compute,
                depository,
                self.catalog.layer(layer)?.size,
            )?;
            start_delay = start_delay.max(latency + queued + transfer);
        }

        let (speed, jitter, service_latency) = if task.kind == TaskKind::Storage {
            let speed = uc.speed.min(cf.speed);
            (
                speed,
                uc.jitter + cf.jitter,
                cf.latency + uc.latency + task.mem / (speed + 1e-6) * 1000.0,
            )
        } else {
            (uc.speed, uc.jitter, uc.latency)
        };
        let utility = task.utility(start_delay, service_latency, speed, jitter);

        // Unit prices must be read before any allocation perturbs them.
        let stream_total = task.bandwidth(Role::Compute) + task.bandwidth(Role::Filestore);
        let compute_device = &self.devices[compute];
        let filestore_device = &self.devices[filestore];
        let mut cost = compute_device.unit_price(Resource::Cpu) * task.cpu
            + compute_device.unit_price(Resource::Bw) * stream_total
            + filestore_device.unit_price(Resource::Bw) * task.bandwidth(Role::Filestore);
        if task.kind == TaskKind::Storage {
            cost += filestore_device.unit_price(Resource::Mem) * task.mem;
        } else {
            cost += compute_device.unit_price(Resource::Mem) * task.mem;
        }
        let reward = utility - cost;

        self.devices[compute].allocate(Role::Compute, &task, &mut self.catalog, None)?;
        self.devices[filestore].allocate(Role::Filestore, &task, &mut self.catalog, None)?;
        for (&layer, &depository) in task.missing_layers.iter().zip(&task.providers.depositories)
        {
            let size = self.catalog.layer(layer)?.size;
            self.devices[depository].allocate(
                Role::Depository,
                &task,
                &mut self.catalog,
                Some(layer),
            )?;
            self.topology.transmit(compute, depository, size, 0.0)?;
        }

        if task.kind == TaskKind::Desktop {
            self.topology.reserve_bw(
                &mut self.devices,
                client,
                compute,
                task.bandwidth(Role::Compute),
            )?;
            self.topology.reserve_bw(
                &mut self.devices,
                compute,
                filestore,
                task.bandwidth(Role::Filestore),
            )?;
        } else {
            self.topology.transmit(client, compute, task.mem, 0.0)?;
            self.topology.transmit(compute, filestore, task.mem, 0.0)?;
        }

        if self.settings.public_data_deduplication
            && self.flags.layered_composition
            && task.kind == TaskKind::Storage
        {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let threshold = (100.0 * self.settings.public_data_rate) as u32;
            for file in &task.files {
                if file.file_id < threshold {
                    self.devices[filestore].cache_public_file(file.file_id);
                }
            }
        }

        self.qos_samples.push(QosSample {
            start_delay,
            service_latency,
            speed,
            jitter,
        });
        self.devices[client].req_tasks.push(task.id);
        self.new_tasks[index].providers = task.providers.clone();
        tracing::debug!(
            task = task.id,
            compute,
            filestore,
            reward,
            "task committed"
        );
        self.scheduled.push(task);
        self.served_num += 1;
        Ok(reward)
    }

    /// Releases everything a finished task held.
    fn release_task(&mut self, task: &Task) -> Result<()> {
        let client = task.user_id;
        let compute = task.providers.compute.ok_or(Error::MissingProvider {
            task: task.id,
            role: Role::Compute,
        })?;
        let filestore = task.providers.filestore.ok_or(Error::MissingProvider {
            task: task.id,
            role: Role::Filestore,
        })?;

        self.topology.release_bw(
            &mut self.devices,
            client,
            compute,
            task.bandwidth(Role::Compute),
        )?;
        self.topology.release_bw(
            &mut self.devices,
            compute,
            filestore,
            task.bandwidth(Role::Filestore),
        )?;
        self.devices[compute].release(Role::Compute, task)?;
        self.devices[filestore].release(Role::Filestore, task)?;
        let unique: BTreeSet<DeviceId> = task.providers.depositories.iter().copied().collect();
        for depository in unique {
            self.devices[depository].release(Role::Depository, task)?;
        }

        let requests = &mut self.devices[client].req_tasks;
        let position = requests
            .iter()
            .position(|&id| id == task.id)
            .ok_or(Error::UntrackedTask {
                task: task.id,
                client,
            })?;
        requests.remove(position);
        tracing::debug!(task = task.id, "expired task released");
        Ok(())
    }

    /// Measures the slot that just finished.
    fn snapshot_slot(&self) -> SlotSnapshot {
        let mean_occupation = |ids: &[DeviceId]| -> [f64; 3] {
            if ids.is_empty() {
                return [0.0; 3];
            }
            let mut sums = [0.0; 3];
            for &id in ids {
                for (slot, resource) in Resource::ALL.into_iter().enumerate() {
                    sums[slot] += self.devices[id].occupied_fraction(resource);
                }
            }
            #[allow(clippy::cast_precision_loss)]
            sums.map(|s| s / ids.len() as f64)
        };

        let server_ids: Vec<DeviceId> = (0..self.settings.servers).collect();
        SlotSnapshot {
            slot: self.slot,
            tasks_num: self.new_tasks.len(),
            served_num: self.served_num,
            qos: self.qos_samples.clone(),
            worker_occupation: mean_occupation(&self.workers),
            server_occupation: mean_occupation(&server_ids),
        }
    }

    /// Debug-mode bookkeeping sweep over every worker.
    fn check_workers(&self) -> Result<()> {
        let mut lookup: HashMap<TaskId, &Task> = HashMap::new();
        for task in &self.scheduled {
            lookup.insert(task.id, task);
        }
        for &worker in &self.workers {
            self.devices[worker].check_error(&self.catalog, &lookup)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CloudModel;
    use oraas_policy::{GreedyScheduler, Scheduler};

    fn settings(model: CloudModel, seed: u64) -> SimSettings {
        SimSettings {
            servers: 2,
            clients: 6,
            area_num: 2,
            cloud_model: model,
            seed,
            debug_mode: true,
            ..SimSettings::default()
        }
    }

    fn greedy_action(observation: &[f64], layout: ObservationLayout) -> i64 {
        Observation::from_flat(observation, &layout)
            .unwrap()
            .map_or(-1, |obs| GreedyScheduler::new().choose(&obs).encode())
    }

    #[test]
    fn every_cloud_model_survives_a_checked_episode() {
        for model in [
            CloudModel::OpenRaas,
            CloudModel::Center,
            CloudModel::CenterRaas,
            CloudModel::Edge,
            CloudModel::EdgeRaas,
            CloudModel::EdgeCache,
        ] {
            let mut env = Environment::new(settings(model, 31)).unwrap();
            let mut observation = env.reset().unwrap();
            for _ in 0..40 {
                let action = greedy_action(&observation, env.layout());
                // debug_mode runs check_error on every worker each slot, so
                // any bookkeeping drift aborts this loop.
                let outcome = env.step(action).unwrap();
                observation = outcome.observation;
            }
        }
    }

    #[test]
    fn reset_is_deterministic_per_seed() {
        let run = |seed: u64| {
            let mut env = Environment::new(settings(CloudModel::OpenRaas, seed)).unwrap();
            let mut trace = env.reset().unwrap();
            for _ in 0..20 {
                let action = greedy_action(&trace, env.layout());
                let outcome = env.step(action).unwrap();
                trace = outcome.observation;
                trace.push(outcome.reward);
            }
            trace
        };
        assert_eq!(run(9), run(9));
        assert_ne!(run(9), run(10));
    }

    #[test]
    fn starved_uplink_yields_sentinel_and_full_drop_rate() {
        let mut config = settings(CloudModel::OpenRaas, 5);
        config.servers = 1;
        config.clients = 1;
        config.task_type = 2; // desktop streams demand uplink bandwidth
        config.worker_rate = 0.0; // the client stays outside the checked worker set
        let mut env = Environment::new(config).unwrap();
        let _ = env.reset().unwrap();

        // Starve the client's uplink; with one task per slot, the next
        // slot's task must drop at the uplink check and report the
        // sentinel.
        let client = env.settings().servers;
        env.devices[client].set_free_bw(0.0);

        let rolled = env.step(-1).unwrap();
        assert!(rolled.entered_new_slot);
        assert!(
            Observation::from_flat(&rolled.observation, &env.layout())
                .unwrap()
                .is_none(),
            "starved uplink must produce the sentinel"
        );

        let dropped = env.step(-1).unwrap();
        assert!(dropped.reward.abs() < f64::EPSILON);
        assert!(dropped.entered_new_slot);
        let slot = env.last_slot().unwrap();
        assert_eq!(slot.served_num, 0);
        assert_eq!(slot.tasks_num, 1);
        assert!((slot.drop_rate() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn desktop_reservations_release_on_expiry() {
        let mut env = Environment::new(settings(CloudModel::OpenRaas, 13)).unwrap();
        env.reset().unwrap();

        // Craft a committed desktop task by hand across two areas.
        let client = env.devices.iter().position(|d| d.is_client).unwrap();
        let compute = 0usize;
        let client_bw_before = env.devices[client].free_bw();
        let compute_bw_before = env.devices[compute].free_bw();

        let mut task = Task::desktop(9999, client, 5.0, &mut env.rng);
        task.app = Some(env.catalog.arbitrary_app(&mut env.rng, Some(oraas_model::AppKind::Desktop)));
        task.set_provider(Role::Compute, compute);
        task.set_provider(Role::Filestore, compute);
        task.life_time = 2;

        let stream = task.bandwidth(Role::Compute);
        env.topology
            .reserve_bw(&mut env.devices, client, compute, stream)
            .unwrap();
        env.devices[compute]
            .allocate(Role::Compute, &task, &mut env.catalog, None)
            .unwrap();
        env.devices[compute]
            .allocate(Role::Filestore, &task, &mut env.catalog, None)
            .unwrap();
        env.devices[client].req_tasks.push(task.id);
        env.scheduled.push(task);

        assert!((env.devices[client].free_bw() - (client_bw_before - stream)).abs() < 1e-10);

        env.next().unwrap();
        assert!(env.scheduled.iter().any(|t| t.id == 9999));
        env.next().unwrap();
        assert!(!env.scheduled.iter().any(|t| t.id == 9999));
        assert!((env.devices[client].free_bw() - client_bw_before).abs() < 1e-10);
        assert!((env.devices[compute].free_bw() - compute_bw_before).abs() < 1e-10);
    }

    #[test]
    fn committed_tasks_always_carry_full_provider_chains() {
        let mut env = Environment::new(settings(CloudModel::EdgeRaas, 17)).unwrap();
        let mut observation = env.reset().unwrap();
        for _ in 0..30 {
            let action = greedy_action(&observation, env.layout());
            observation = env.step(action).unwrap().observation;
        }
        for task in env.scheduled() {
            assert!(task.providers.compute.is_some());
            assert!(task.providers.filestore.is_some());
            assert_eq!(task.providers.depositories.len(), task.missing_layers.len());
            assert!(task.life_time >= 1);
        }
    }

    #[test]
    fn drop_actions_are_free() {
        let mut env = Environment::new(settings(CloudModel::Center, 23)).unwrap();
        let mut observation = env.reset().unwrap();
        for _ in 0..25 {
            // Always drop, even when candidates exist: rewards stay 0 and
            // nothing is ever committed.
            let outcome = env.step(-1).unwrap();
            assert!(outcome.reward.abs() < f64::EPSILON);
            observation = outcome.observation;
        }
        let _ = observation;
        assert_eq!(env.served_num(), 0);
        assert!(env.scheduled().is_empty());
    }
}
