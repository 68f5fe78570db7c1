use crate::artifacts::target_segments;
use crate::config::{Config, TargetEntry};
use crate::error::ConfigError;
use crate::model::MonitoringTarget;
use log::{debug, info, warn};
use std::collections::HashSet;

/// Resolved, ordered set of monitoring targets for one run
///
/// Resolution is deterministic: services and their targets are visited in
/// sorted key order, so the same configuration always yields the same
/// sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetCatalog {
    targets: Vec<MonitoringTarget>,
}

impl TargetCatalog {
    /// Resolve the configuration into a flat list of targets
    ///
    /// Service ids and target names are trimmed and upper-cased; when two
    /// entries normalize to the same identity, or to the same evidence
    /// directory, the first one wins. The service and target filters from
    /// `run.services` / `run.targets` are applied here.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` when an entry lacks a region or
    /// dashboard, and `ConfigError::EmptyCatalog` when nothing remains.
    pub fn resolve(config: &Config) -> Result<Self, ConfigError> {
        let service_filter: Vec<String> =
            config.run.services.iter().map(|s| s.to_uppercase()).collect();
        let target_filter: Vec<String> =
            config.run.targets.iter().map(|t| t.to_uppercase()).collect();

        let mut seen = HashSet::new();
        let mut directories = HashSet::new();
        let mut targets = Vec::new();
        let mut matched_services = HashSet::new();
        let mut matched_targets = HashSet::new();

        for (raw_service, entries) in &config.services {
            let service_id = raw_service.trim().to_uppercase();
            if !service_filter.is_empty() && !service_filter.contains(&service_id) {
                continue;
            }
            matched_services.insert(service_id.clone());

            for (raw_name, entry) in entries {
                let name = raw_name.trim().to_uppercase();
                if !target_filter.is_empty() && !target_filter.contains(&name) {
                    continue;
                }
                matched_targets.insert(name.clone());

                let target = Self::build_target(config, &service_id, name, entry)?;
                if !seen.insert((target.service_id.clone(), target.name.clone())) {
                    warn!(
                        "Duplicate target {} (from entry '{}/{}'), keeping the first definition",
                        target.key(),
                        raw_service,
                        raw_name
                    );
                    continue;
                }
                let segments = target_segments(&target);
                if !directories.insert(segments.clone()) {
                    warn!(
                        "Target {} would share evidence directory {}/{} with an earlier target, skipping it",
                        target.key(),
                        segments.0,
                        segments.1
                    );
                    continue;
                }
                debug!("Resolved target {}", target);
                targets.push(target);
            }
        }

        for wanted in &service_filter {
            if !matched_services.contains(wanted) {
                warn!("Service filter '{}' matches no configured service", wanted);
            }
        }
        for wanted in &target_filter {
            if !matched_targets.contains(wanted) {
                warn!("Target filter '{}' matches no configured target", wanted);
            }
        }

        if targets.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }

        info!("Resolved {} monitoring target(s)", targets.len());
        Ok(Self { targets })
    }

    fn build_target(
        config: &Config,
        service_id: &str,
        name: String,
        entry: &TargetEntry,
    ) -> Result<MonitoringTarget, ConfigError> {
        let label = format!("{}/{}", service_id, name);
        let dashboard_id = required(entry.dashboard_id.as_deref(), &label, "dashboard_id")?;
        let region = required(entry.region.as_deref(), &label, "region")?;

        Ok(MonitoringTarget {
            service_id: service_id.to_string(),
            name,
            region,
            dashboard_id,
            log_group_id: non_blank(entry.log_group_id.as_deref()),
            credential_profile: non_blank(entry.profile.as_deref())
                .or_else(|| non_blank(config.profiles.default.as_deref())),
            rds_instance: non_blank(entry.rds_instance.as_deref()),
        })
    }

    pub fn targets(&self) -> &[MonitoringTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(value: Option<&str>, target: &str, field: &'static str) -> Result<String, ConfigError> {
    non_blank(value).ok_or_else(|| ConfigError::MissingField {
        target: target.to_string(),
        field,
    })
}
