//! The configuration record one simulation consumes.
//!
//! Key names match the external YAML schema (`M`, `N`, `cloud_model`, ...);
//! partial files load against the defaults.

use crate::error::{Error, Result};
use oraas_model::TaskKind;
use oraas_policy::ObservationLayout;
use serde::{Deserialize, Serialize};

/// The six cloud-model variants governing who may act as which role and how
/// data is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CloudModel {
    /// Open P2P: clients may serve, layered images, TTL layer eviction.
    OpenRaas,
    /// Only central servers in area 0 serve; apps bundled with layers.
    Center,
    /// Central servers serve with layer-level composition.
    CenterRaas,
    /// Only in-area devices serve; apps bundled with layers.
    Edge,
    /// Layered composition restricted to the client's area.
    EdgeRaas,
    /// Edge composition with opportunistic caching on failure.
    EdgeCache,
}

/// Behaviour switches one cloud model decomposes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFlags {
    /// Clients flagged as workers may serve.
    pub peer_workers: bool,
    /// Images are composed from layers instead of placed as whole bundles.
    pub layered_composition: bool,
    /// Servers sit in area 0, clients elsewhere.
    pub centralized: bool,
    /// Composition is restricted to the client's area.
    pub area_restricted: bool,
    /// Failed compositions seed an edge cache for future requests.
    pub opportunistic_cache: bool,
}

impl CloudModel {
    /// Log label of this model.
    pub const fn label(self) -> &'static str {
        match self {
            Self::OpenRaas => "openraas",
            Self::Center => "center",
            Self::CenterRaas => "center_raas",
            Self::Edge => "edge",
            Self::EdgeRaas => "edge_raas",
            Self::EdgeCache => "edge_cache",
        }
    }

    /// The behaviour switches this model stands for.
    pub const fn flags(self) -> ModelFlags {
        match self {
            Self::OpenRaas => ModelFlags {
                peer_workers: true,
                layered_composition: true,
                centralized: false,
                area_restricted: false,
                opportunistic_cache: false,
            },
            Self::Center => ModelFlags {
                peer_workers: false,
                layered_composition: false,
                centralized: true,
                area_restricted: false,
                opportunistic_cache: false,
            },
            Self::CenterRaas => ModelFlags {
                peer_workers: false,
                layered_composition: true,
                centralized: true,
                area_restricted: false,
                opportunistic_cache: false,
            },
            Self::Edge => ModelFlags {
                peer_workers: false,
                layered_composition: false,
                centralized: false,
                area_restricted: true,
                opportunistic_cache: false,
            },
            Self::EdgeRaas => ModelFlags {
                peer_workers: false,
                layered_composition: true,
                centralized: false,
                area_restricted: true,
                opportunistic_cache: false,
            },
            Self::EdgeCache => ModelFlags {
                peer_workers: false,
                layered_composition: false,
                centralized: false,
                area_restricted: true,
                opportunistic_cache: true,
            },
        }
    }
}

impl TryFrom<i64> for CloudModel {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, String> {
        match value {
            0 => Ok(Self::OpenRaas),
            1 => Ok(Self::Center),
            2 => Ok(Self::CenterRaas),
            3 => Ok(Self::Edge),
            4 => Ok(Self::EdgeRaas),
            5 => Ok(Self::EdgeCache),
            _ => Err(format!("cloud_model {value} is out of range 0..=5")),
        }
    }
}

impl From<CloudModel> for i64 {
    fn from(model: CloudModel) -> Self {
        match model {
            CloudModel::OpenRaas => 0,
            CloudModel::Center => 1,
            CloudModel::CenterRaas => 2,
            CloudModel::Edge => 3,
            CloudModel::EdgeRaas => 4,
            CloudModel::EdgeCache => 5,
        }
    }
}

/// One simulation's configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    /// Number of central servers.
    #[serde(rename = "M")]
    pub servers: usize,
    /// Number of clients.
    #[serde(rename = "N")]
    pub clients: usize,
    /// Number of network areas.
    pub area_num: usize,
    /// Filestore candidates reported per observation.
    pub candidates_num: usize,
    /// Task-intrinsic values per observation.
    pub task_info_num: usize,
    /// Worker-type cardinality reported to learned policies.
    pub compute_type_num: usize,
    /// Values per filestore candidate slot.
    pub filestore_info_num: usize,
    /// Cloud-model variant.
    pub cloud_model: CloudModel,
    /// Task kind to emit: `-1` random mix, `0..=2` fixed.
    pub task_type: i64,
    /// Fraction of clients flagged as workers.
    pub worker_rate: f64,
    /// Restrict compute selection to the client's area.
    pub compute_at_edge: bool,
    /// Deduplicate public files of storage tasks.
    pub public_data_deduplication: bool,
    /// Fraction of the file-id space considered public.
    pub public_data_rate: f64,
    /// Opportunistically place apps when the filestore pool is empty.
    pub raas_cache: bool,
    /// Episodes per simulation.
    pub num_ep_train: usize,
    /// Environment steps per episode.
    pub max_ep_length: usize,
    /// Master seed.
    pub seed: u64,
    /// Aggressive between-slot bookkeeping checks.
    pub debug_mode: bool,
    /// Accumulate per-slot statistics.
    pub get_statistics: bool,
    /// Log per-slot statistics as they accumulate.
    pub print_statistics_per_slot: bool,
    /// Probability a client emits a task per slot.
    pub task_emit_prob: f64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            servers: 4,
            clients: 40,
            area_num: 4,
            candidates_num: 10,
            task_info_num: 4,
            compute_type_num: 4,
            filestore_info_num: 3,
            cloud_model: CloudModel::OpenRaas,
            task_type: -1,
            worker_rate: 0.2,
            compute_at_edge: false,
            public_data_deduplication: false,
            public_data_rate: 0.5,
            raas_cache: false,
            num_ep_train: 1,
            max_ep_length: 100,
            seed: 42,
            debug_mode: false,
            get_statistics: true,
            print_statistics_per_slot: false,
            task_emit_prob: 1.0,
        }
    }
}

impl SimSettings {
    /// Validates cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.servers == 0 {
            return Err(Error::InvalidConfig("M must be at least 1".into()));
        }
        if self.area_num == 0 {
            return Err(Error::InvalidConfig("area_num must be at least 1".into()));
        }
        if self.cloud_model.flags().centralized && self.area_num < 2 {
            return Err(Error::InvalidConfig(
                "centralized models need area_num >= 2 (servers in area 0, clients elsewhere)"
                    .into(),
            ));
        }
        if self.candidates_num == 0 {
            return Err(Error::InvalidConfig(
                "candidates_num must be at least 1".into(),
            ));
        }
        if self.task_info_num < 4 {
            return Err(Error::InvalidConfig(
                "task_info_num must be at least 4".into(),
            ));
        }
        if self.filestore_info_num != 3 {
            return Err(Error::InvalidConfig(
                "filestore_info_num must be 3 (bandwidth, latency, jitter)".into(),
            ));
        }
        for (key, value) in [
            ("worker_rate", self.worker_rate),
            ("public_data_rate", self.public_data_rate),
            ("task_emit_prob", self.task_emit_prob),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!("{key} must be in [0, 1]")));
            }
        }
        self.task_kind()?;
        Ok(())
    }

    /// The configured task kind, or `None` for the random mix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] wrapping an out-of-range tag.
    pub fn task_kind(&self) -> Result<Option<TaskKind>> {
        if self.task_type == -1 {
            return Ok(None);
        }
        Ok(Some(TaskKind::from_code(self.task_type)?))
    }

    /// The observation layout this configuration implies.
    pub const fn layout(&self) -> ObservationLayout {
        ObservationLayout {
            task_info_num: self.task_info_num,
            candidates_num: self.candidates_num,
            filestore_info_num: self.filestore_info_num,
        }
    }

    /// Log label: the cloud model, suffixed when deduplication is active.
    pub fn model_label(&self) -> String {
        let base = self.cloud_model.label();
        if self.public_data_deduplication {
            format!("{base}_deduplication")
        } else {
            base.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SimSettings::default().validate().unwrap();
    }

    #[test]
    fn yaml_keys_follow_the_external_schema() {
        let settings: SimSettings = serde_yaml::from_str(
            "M: 2\nN: 10\ncloud_model: 4\ntask_type: 1\nworker_rate: 0.5\n",
        )
        .unwrap();
        assert_eq!(settings.servers, 2);
        assert_eq!(settings.clients, 10);
        assert_eq!(settings.cloud_model, CloudModel::EdgeRaas);
        assert_eq!(settings.task_kind().unwrap(), Some(TaskKind::Storage));
        // Unset keys fall back to defaults.
        assert_eq!(settings.candidates_num, 10);
    }

    #[test]
    fn bad_cloud_model_is_rejected_at_parse_time() {
        let err = serde_yaml::from_str::<SimSettings>("cloud_model: 9\n");
        assert!(err.is_err());
    }

    #[test]
    fn centralized_model_needs_a_client_area() {
        let settings = SimSettings {
            cloud_model: CloudModel::Center,
            area_num: 1,
            ..SimSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn model_flags_cover_the_variant_table() {
        assert!(CloudModel::OpenRaas.flags().peer_workers);
        assert!(CloudModel::OpenRaas.flags().layered_composition);
        assert!(CloudModel::Center.flags().centralized);
        assert!(!CloudModel::Center.flags().layered_composition);
        assert!(CloudModel::CenterRaas.flags().layered_composition);
        assert!(CloudModel::Edge.flags().area_restricted);
        assert!(CloudModel::EdgeRaas.flags().layered_composition);
        assert!(CloudModel::EdgeCache.flags().opportunistic_cache);
    }

    #[test]
    fn dedup_suffix_appears_in_the_label() {
        let mut settings = SimSettings::default();
        assert_eq!(settings.model_label(), "openraas");
        settings.public_data_deduplication = true;
        assert_eq!(settings.model_label(), "openraas_deduplication");
    }
}
