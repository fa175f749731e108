//! Typed client requests and their lifecycle state.
//!
//! A task is a single owned record: devices and role lists refer to it by
//! id, and only the environment mutates it. The three provider slots mirror
//! the compute / filestore / depository service chain.

use crate::catalog::AppKind;
use crate::error::{Error, Result};
use crate::sampling::{clipped_normal, rounded_normal};
use crate::{AppId, DeviceId, FileId, LayerId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Task identifier, unique within one simulation.
pub type TaskId = u64;

/// Number of QoS weight entries carried by every task.
pub const QOS_WEIGHTS: usize = 7;

/// Microservice role inside a composed service chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Hosts the running microservice and consumes the client upload.
    Compute,
    /// Provides (or ingests) the application file set at service time.
    Filestore,
    /// Supplies missing container layers before service start.
    Depository,
}

impl Role {
    /// Maps a numeric role tag onto the enum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] for tags outside `0..=2`.
    pub const fn from_index(index: i64) -> Result<Self> {
        match index {
            0 => Ok(Self::Compute),
            1 => Ok(Self::Filestore),
            2 => Ok(Self::Depository),
            _ => Err(Error::OutOfRange {
                what: "role",
                value: index,
            }),
        }
    }

    /// Numeric tag of this role.
    pub const fn index(self) -> usize {
        match self {
            Self::Compute => 0,
            Self::Filestore => 1,
            Self::Depository => 2,
        }
    }
}

/// The three task kinds a client can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// One-slot computation offloading.
    Process,
    /// Cloud-drive upload held for several slots.
    Storage,
    /// Interactive desktop stream with a long-lived bandwidth reservation.
    Desktop,
}

impl TaskKind {
    /// Maps a numeric kind tag onto the enum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] for tags outside `0..=2`.
    pub const fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::Process),
            1 => Ok(Self::Storage),
            2 => Ok(Self::Desktop),
            _ => Err(Error::OutOfRange {
                what: "task kind",
                value: code,
            }),
        }
    }

    /// The application kind serving this task kind.
    pub const fn app_kind(self) -> AppKind {
        match self {
            Self::Process => AppKind::Processing,
            Self::Storage => AppKind::Storage,
            Self::Desktop => AppKind::Desktop,
        }
    }
}

/// One user file inside a storage task upload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Public file identity used for deduplication.
    pub file_id: FileId,
    /// File size in MB.
    pub size: f64,
}

/// The provider triple of a composed service chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Providers {
    /// Chosen compute worker.
    pub compute: Option<DeviceId>,
    /// Chosen filestore worker.
    pub filestore: Option<DeviceId>,
    /// Depository per missing layer, parallel to `Task::missing_layers`.
    pub depositories: Vec<DeviceId>,
}

/// A typed client request with QoS weights and provider triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: TaskId,
    /// Task kind.
    pub kind: TaskKind,
    /// Computation demand in GFlops.
    pub cpu: f64,
    /// Memory demand in MB. For storage tasks this is the upload volume and
    /// lands on the filestore instead of the compute worker.
    pub mem: f64,
    /// Id of the requesting client.
    pub user_id: DeviceId,
    /// Number of slots the committed task occupies.
    pub span: u32,
    /// QoS weight vector; see [`Task::utility`] for the index meanings.
    pub qos: [f64; QOS_WEIGHTS],
    /// Application to run; filled at collection time when unset.
    pub app: Option<AppId>,
    /// Chosen providers.
    pub providers: Providers,
    /// Layers the chosen compute worker was missing, captured at
    /// candidate-generation time and immutable through commit.
    pub missing_layers: Vec<LayerId>,
    /// Remaining slots before release.
    pub life_time: i64,
    /// Whether the task was dropped instead of served.
    pub dropped: bool,
    /// Upload contents (storage tasks only).
    pub files: Vec<StoredFile>,
    stream_bw: f64,
}

impl Task {
    /// Generates a process task.
    #[must_use]
    pub fn process(id: TaskId, user_id: DeviceId, rng: &mut ChaCha8Rng) -> Self {
        let cpu = clipped_normal(rng, 5.0, 5.0, 0.1);
        Self::base(id, TaskKind::Process, cpu, 5.0, user_id, 1, rng)
    }

    /// Generates a storage task: a bag of 500 MB files with unique public
    /// file ids, held for a sampled span.
    #[must_use]
    pub fn storage(id: TaskId, user_id: DeviceId, rng: &mut ChaCha8Rng) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let file_num = rounded_normal(rng, 10.0, 3.0, 1.0) as usize;
        let mut files: Vec<StoredFile> = Vec::with_capacity(file_num);
        while files.len() < file_num {
            let file_id = rng.gen_range(0..99u32);
            if files.iter().all(|f| f.file_id != file_id) {
                files.push(StoredFile {
                    file_id,
                    size: 500.0,
                });
            }
        }
        let mem = files.iter().map(|f| f.size).sum();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let span = rounded_normal(rng, 5.0, 2.0, 1.0) as u32;
        let mut task = Self::base(id, TaskKind::Storage, 0.0, mem, user_id, span, rng);
        task.files = files;
        task
    }

    /// Generates a desktop task. `client_bw` caps the sampled stream
    /// bandwidth at what the client's access line can carry.
    #[must_use]
    pub fn desktop(id: TaskId, user_id: DeviceId, client_bw: f64, rng: &mut ChaCha8Rng) -> Self {
        let cpu = clipped_normal(rng, 5.0, 10.0, 0.1);
        let mem = clipped_normal(rng, 1000.0, 300.0, 10.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let span = rounded_normal(rng, 1.0, 3.0, 1.0) as u32;
        let mut task = Self::base(id, TaskKind::Desktop, cpu, mem, user_id, span, rng);
        let hi = client_bw.min(1.0);
        task.stream_bw = if hi > 0.01 {
            rng.gen_range(0.01..hi)
        } else {
            0.01
        };
        task
    }

    /// Generates a task of the given kind, or of a random kind drawn from
    /// the 10:60:30 process/storage/desktop mix when `kind` is `None`.
    #[must_use]
    pub fn generate(
        id: TaskId,
        kind: Option<TaskKind>,
        user_id: DeviceId,
        client_bw: f64,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let kind = kind.unwrap_or_else(|| {
            let r = rng.gen_range(0..100);
            if r < 10 {
                TaskKind::Process
            } else if r < 70 {
                TaskKind::Storage
            } else {
                TaskKind::Desktop
            }
        });
        match kind {
            TaskKind::Process => Self::process(id, user_id, rng),
            TaskKind::Storage => Self::storage(id, user_id, rng),
            TaskKind::Desktop => Self::desktop(id, user_id, client_bw, rng),
        }
    }

    fn base(
        id: TaskId,
        kind: TaskKind,
        cpu: f64,
        mem: f64,
        user_id: DeviceId,
        span: u32,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut qos = [0.0; QOS_WEIGHTS];
        // Signs per weight: delays and jitter charge, lifetime/volume/compute
        // pay.
        for (i, w) in qos.iter_mut().enumerate() {
            let magnitude: f64 = rng.gen();
            *w = match i {
                0 | 1 | 3 => -magnitude,
                _ => magnitude,
            };
        }
        Self {
            id,
            kind,
            cpu,
            mem,
            user_id,
            span,
            qos,
            app: None,
            providers: Providers::default(),
            missing_layers: Vec::new(),
            life_time: i64::from(span),
            dropped: false,
            files: Vec::new(),
            stream_bw: 0.0,
        }
    }

    /// Bandwidth occupied on the link serving the given role, in MBps.
    ///
    /// Only desktop streams hold long-lived bandwidth: the client stream on
    /// the compute link and a fixed 1 MBps application stream on the
    /// filestore link. Image fetches are transient transfers.
    #[must_use]
    pub const fn bandwidth(&self, role: Role) -> f64 {
        match (self.kind, role) {
            (TaskKind::Desktop, Role::Compute) => self.stream_bw,
            (TaskKind::Desktop, Role::Filestore) => 1.0,
            _ => 0.0,
        }
    }

    /// The task-intrinsic utility term `w4·span + w5·mem + w6·cpu`.
    #[must_use]
    pub fn intrinsic_utility(&self) -> f64 {
        self.qos[4] * f64::from(self.span) + self.qos[5] * self.mem + self.qos[6] * self.cpu
    }

    /// Utility of a served task given its measured QoS. Linear in each
    /// input: start-up delay, service latency, and jitter charge (negative
    /// weights), speed pays.
    #[must_use]
    pub fn utility(&self, start_delay: f64, service_latency: f64, speed: f64, jitter: f64) -> f64 {
        self.intrinsic_utility()
            + self.qos[0] * start_delay
            + self.qos[1] * service_latency
            + self.qos[2] * speed
            + self.qos[3] * jitter
    }

    /// Records a provider choice for the given role. Depositories append.
    pub fn set_provider(&mut self, role: Role, device: DeviceId) {
        match role {
            Role::Compute => self.providers.compute = Some(device),
            Role::Filestore => self.providers.filestore = Some(device),
            Role::Depository => self.providers.depositories.push(device),
        }
    }

    /// True once compute and filestore are chosen and every missing layer
    /// has a depository.
    #[must_use]
    pub fn is_fully_assigned(&self) -> bool {
        self.providers.compute.is_some()
            && self.providers.filestore.is_some()
            && self.providers.depositories.len() == self.missing_layers.len()
    }

    /// Ages the task by one slot.
    ///
    /// Returns `true` when the lifetime just ran out and the task must be
    /// released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LifetimeOverrun`] if the task was already past its
    /// lifetime, which indicates a release-bookkeeping bug.
    pub fn age(&mut self) -> Result<bool> {
        self.life_time -= 1;
        if self.life_time < 0 {
            return Err(Error::LifetimeOverrun { task: self.id });
        }
        Ok(self.life_time == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn rng(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }

    #[test]
    fn storage_task_mem_is_file_total() {
        let mut r = rng(3);
        for _ in 0..20 {
            let task = Task::storage(0, 5, &mut r);
            let total: f64 = task.files.iter().map(|f| f.size).sum();
            assert!((task.mem - total).abs() < 1e-9);
            assert!(!task.files.is_empty());
            let mut ids: Vec<_> = task.files.iter().map(|f| f.file_id).collect();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), task.files.len(), "file ids must be unique");
        }
    }

    #[test]
    fn desktop_stream_bw_is_capped_by_client() {
        let mut r = rng(4);
        for _ in 0..50 {
            let task = Task::desktop(0, 5, 0.5, &mut r);
            let bw = task.bandwidth(Role::Compute);
            assert!(bw >= 0.01 && bw < 0.5);
            assert!((task.bandwidth(Role::Filestore) - 1.0).abs() < f64::EPSILON);
            assert!(task.bandwidth(Role::Depository).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn non_desktop_tasks_reserve_no_bandwidth() {
        let mut r = rng(5);
        let task = Task::process(0, 1, &mut r);
        assert!(task.bandwidth(Role::Compute).abs() < f64::EPSILON);
        let task = Task::storage(1, 1, &mut r);
        assert!(task.bandwidth(Role::Filestore).abs() < f64::EPSILON);
    }

    #[test]
    fn aging_flags_expiry_then_errors() {
        let mut r = rng(6);
        let mut task = Task::process(0, 1, &mut r);
        assert_eq!(task.span, 1);
        assert_eq!(task.age(), Ok(true));
        assert_eq!(task.age(), Err(Error::LifetimeOverrun { task: 0 }));
    }

    #[test]
    fn role_tags_round_trip() {
        for tag in 0..3 {
            assert_eq!(Role::from_index(tag).unwrap().index() as i64, tag);
        }
        assert!(Role::from_index(3).is_err());
        assert!(TaskKind::from_code(-1).is_err());
    }

    proptest! {
        #[test]
        fn utility_is_linear_with_specified_signs(seed in 0u64..1000) {
            let mut r = rng(seed);
            let task = Task::desktop(0, 1, 10.0, &mut r);
            let base = task.utility(10.0, 10.0, 10.0, 10.0);
            // Increasing a negatively-weighted input cannot raise utility.
            prop_assert!(task.utility(20.0, 10.0, 10.0, 10.0) <= base);
            prop_assert!(task.utility(10.0, 20.0, 10.0, 10.0) <= base);
            prop_assert!(task.utility(10.0, 10.0, 10.0, 20.0) <= base);
            // Speed is positively weighted.
            prop_assert!(task.utility(10.0, 10.0, 20.0, 10.0) >= base);
        }

        #[test]
        fn generated_parameters_respect_floors(seed in 0u64..500) {
            let mut r = rng(seed);
            let task = Task::generate(0, None, 2, 5.0, &mut r);
            prop_assert!(task.span >= 1);
            match task.kind {
                TaskKind::Process => {
                    prop_assert!(task.cpu >= 0.1);
                    prop_assert!((task.mem - 5.0).abs() < f64::EPSILON);
                }
                TaskKind::Storage => prop_assert!(task.cpu.abs() < f64::EPSILON),
                TaskKind::Desktop => {
                    prop_assert!(task.cpu >= 0.1);
                    prop_assert!(task.mem >= 10.0);
                }
            }
        }
    }
}
