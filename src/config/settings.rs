use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{error::DispatchError, topology::Topology};

/// Sample plan written by `pd init`
pub const SAMPLE_PLAN: &str = r#"# Province dispatch plan
province_count: 3
pharmacies: [4, 2, 0]
clinics: [3, 1, 0]
hospitals: [1, 0, 0]
distributors_per_province: [2, 1, 2]
avg_delivery_time_ms: 200
tuning:
  shortage_threshold: 2
  max_iterations: 1000
"#;

/// Input plan: how many sites each province serves and how many distributors it has
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatchPlan {
    pub province_count:            usize,
    pub pharmacies:                Vec<u32>,
    pub clinics:                   Vec<u32>,
    pub hospitals:                 Vec<u32>,
    pub distributors_per_province: Vec<usize>,
    /// Simulated time to deliver one order
    pub avg_delivery_time_ms:      u64,
    #[serde(default)]
    pub tuning:                    Tuning
}

/// Protocol timing and policy knobs
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Tuning {
    pub worker_backpressure_ms:      u64,
    pub leader_backpressure_ms:      u64,
    pub coordinator_backpressure_ms: u64,
    /// Liveness bound on the coordinator's monitoring loop
    pub max_iterations:              u64,
    /// Consecutive empty coordinator iterations before a forced sweep
    pub idle_sweep_streak:           u64,
    pub status_every:                u64,
    pub leader_status_every:         u64,
    /// Unassigned orders a starved province may carry before asking for help
    pub shortage_threshold:          u32,
    pub rendezvous_timeout_ms:       u64,
    /// Treat a full advisory pool as completion
    pub implicit_completion:         bool
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            worker_backpressure_ms:      10,
            leader_backpressure_ms:      10,
            coordinator_backpressure_ms: 100,
            max_iterations:              1000,
            idle_sweep_streak:           50,
            status_every:                100,
            leader_status_every:         50,
            shortage_threshold:          2,
            rendezvous_timeout_ms:       5000,
            implicit_completion:         false
        }
    }
}

impl Tuning {
    pub fn worker_backpressure(&self) -> Duration {
        Duration::from_millis(self.worker_backpressure_ms)
    }

    pub fn leader_backpressure(&self) -> Duration {
        Duration::from_millis(self.leader_backpressure_ms)
    }

    pub fn coordinator_backpressure(&self) -> Duration {
        Duration::from_millis(self.coordinator_backpressure_ms)
    }

    pub fn rendezvous_timeout(&self) -> Duration {
        Duration::from_millis(self.rendezvous_timeout_ms)
    }
}

impl DispatchPlan {
    /// Plan with one entry per province: `(pharmacies, clinics, hospitals, distributors)`
    pub fn from_provinces(provinces: &[(u32, u32, u32, usize)], avg_delivery_time_ms: u64) -> Self {
        Self {
            province_count: provinces.len(),
            pharmacies: provinces.iter().map(|p| p.0).collect(),
            clinics: provinces.iter().map(|p| p.1).collect(),
            hospitals: provinces.iter().map(|p| p.2).collect(),
            distributors_per_province: provinces.iter().map(|p| p.3).collect(),
            avg_delivery_time_ms,
            tuning: Tuning::default()
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, DispatchError> {
        let plan: Self = serde_yaml::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.province_count == 0 {
            return Err(DispatchError::Validation("plan needs at least one province".to_string()));
        }

        let lengths = [
            ("pharmacies", self.pharmacies.len()),
            ("clinics", self.clinics.len()),
            ("hospitals", self.hospitals.len()),
            ("distributors_per_province", self.distributors_per_province.len())
        ];
        for (name, len) in lengths {
            if len != self.province_count {
                return Err(DispatchError::Validation(format!(
                    "{} has {} entries but province_count is {}",
                    name, len, self.province_count
                )));
            }
        }

        if let Some(province) = self.distributors_per_province.iter().position(|count| *count == 0) {
            return Err(DispatchError::Validation(format!("province {} has no distributors", province)));
        }

        for province in 0..self.province_count {
            self.try_orders_for(province)?;
        }

        if self.tuning.max_iterations == 0 {
            return Err(DispatchError::Validation("tuning.max_iterations must be positive".to_string()));
        }

        Ok(())
    }

    fn try_orders_for(&self, province: usize) -> Result<u32, DispatchError> {
        self.pharmacies[province]
            .checked_add(self.clinics[province])
            .and_then(|sum| sum.checked_add(self.hospitals[province]))
            .ok_or_else(|| DispatchError::Validation(format!("province {} has too many orders", province)))
    }

    /// Orders a province must deliver: one per pharmacy, clinic and hospital
    pub fn orders_for(&self, province: usize) -> u32 {
        self.try_orders_for(province).unwrap_or(u32::MAX)
    }

    pub fn orders(&self) -> Vec<u32> {
        (0..self.province_count).map(|province| self.orders_for(province)).collect()
    }

    pub fn delivery_time(&self) -> Duration {
        Duration::from_millis(self.avg_delivery_time_ms)
    }

    pub fn topology(&self) -> Topology {
        Topology::from_counts(&self.distributors_per_province)
    }
}

/// Get the project directories for cross-platform config path resolution
pub fn get_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "province-dispatch").context("Failed to determine project directories")
}

/// Get the configuration directory path
pub fn get_config_dir() -> Result<PathBuf> {
    let project_dirs = get_project_dirs()?;
    Ok(project_dirs.config_dir().to_path_buf())
}

/// Get the default plan file path
pub fn get_plan_file_path() -> Result<PathBuf> {
    let config_dir = get_config_dir()?;
    Ok(config_dir.join("plan.yaml"))
}

/// Load and validate a plan, falling back to the default location
pub fn load_plan(path: Option<&Path>) -> Result<DispatchPlan> {
    let plan_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_plan_file_path()?
    };

    let content = fs::read_to_string(&plan_path)
        .with_context(|| format!("Failed to read plan file: {}", plan_path.display()))?;

    let plan: DispatchPlan = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse plan file: {}", plan_path.display()))?;
    plan.validate().with_context(|| format!("Invalid plan: {}", plan_path.display()))?;

    Ok(plan)
}

/// Write the sample plan to the default location unless one already exists
pub fn init_plan() -> Result<PathBuf> {
    let plan_path = get_plan_file_path()?;
    write_sample_plan(&plan_path)?;
    Ok(plan_path)
}

/// Write the sample plan to `path` unless a file is already there
pub fn write_sample_plan(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    fs::write(path, SAMPLE_PLAN).with_context(|| format!("Failed to write plan file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_plan_parses() {
        let plan = DispatchPlan::from_yaml(SAMPLE_PLAN).expect("sample plan should be valid");

        assert_eq!(plan.orders(), vec![8, 3, 0]);
        assert_eq!(plan.topology().world_size(), 1 + 3 + 2 + 3);
        assert_eq!(plan.tuning.shortage_threshold, 2);
        // Unspecified knobs keep their defaults.
        assert_eq!(plan.tuning.coordinator_backpressure_ms, 100);
        assert!(!plan.tuning.implicit_completion);
    }

    #[test]
    fn test_mismatched_lengths_are_rejected() {
        let yaml = r#"
province_count: 2
pharmacies: [1, 2]
clinics: [1]
hospitals: [0, 0]
distributors_per_province: [1, 1]
avg_delivery_time_ms: 1
"#;
        let err = DispatchPlan::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(message) if message.contains("clinics")));
    }

    #[test]
    fn test_province_without_distributors_is_rejected() {
        let plan = DispatchPlan::from_provinces(&[(1, 0, 0, 1), (2, 0, 0, 0)], 1);
        assert!(matches!(plan.validate(), Err(DispatchError::Validation(_))));
    }

    #[test]
    fn test_order_overflow_is_rejected() {
        let plan = DispatchPlan::from_provinces(&[(u32::MAX, 1, 0, 1)], 1);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_load_and_init_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("plan.yaml");

        write_sample_plan(&path).unwrap();
        let plan = load_plan(Some(&path)).unwrap();
        assert_eq!(plan.province_count, 3);

        fs::write(&path, "province_count: 0\npharmacies: []\nclinics: []\nhospitals: []\ndistributors_per_province: []\navg_delivery_time_ms: 1\n").unwrap();
        // Existing files are left alone.
        write_sample_plan(&path).unwrap();
        let err = load_plan(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("at least one province"));

        assert!(load_plan(Some(&dir.path().join("missing.yaml"))).is_err());
    }
}
