//! # Status Tracker
//!
//! Per-pass registry of component reporters and top-level conditions. A fresh
//! tracker is built for every reconciliation pass and consumed once by
//! [`StatusTracker::report_status`].

use super::condition::{new_condition, now, set_condition};
use super::StatusReporter;
use crate::client::ClusterClient;
use crate::crd::{
    condition_type, reason, ComponentCondition, Condition, ConditionStatus, Phase,
    PlatformEngine, PlatformEngineStatus,
};
use std::sync::Arc;
use tracing::debug;

type ComponentKey = (String, String);

#[derive(Debug, Default)]
pub struct StatusTracker {
    uid: Option<String>,
    components: Vec<(ComponentKey, Arc<dyn StatusReporter>)>,
    conditions: Vec<Condition>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all tracked state, scoping the tracker to `uid`
    pub fn reset(&mut self, uid: &str) {
        self.uid = Some(uid.to_string());
        self.components.clear();
        self.conditions.clear();
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// Track a reporter; a reporter with the same name and namespace is replaced
    pub fn add_component<R: StatusReporter + 'static>(&mut self, reporter: R) {
        self.add_shared(Arc::new(reporter));
    }

    pub fn add_shared(&mut self, reporter: Arc<dyn StatusReporter>) {
        let key = (reporter.name().to_string(), reporter.namespace().to_string());
        match self.components.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = reporter,
            None => self.components.push((key, reporter)),
        }
    }

    /// Stop tracking the reporter with this identity; absent keys are ignored
    pub fn remove_component(&mut self, reporter: &dyn StatusReporter) {
        self.remove_key(reporter.name(), reporter.namespace());
    }

    pub fn remove_key(&mut self, name: &str, namespace: &str) {
        self.components
            .retain(|((n, ns), _)| !(n == name && ns == namespace));
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn is_tracked(&self, name: &str, namespace: &str) -> bool {
        self.components
            .iter()
            .any(|((n, ns), _)| n == name && ns == namespace)
    }

    /// Upsert a top-level condition by type
    pub fn add_condition(&mut self, condition: Condition) {
        set_condition(&mut self.conditions, condition);
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Probe every tracked component and build the aggregate status
    ///
    /// `engine` supplies the previously persisted status, used to keep
    /// transition times stable, plus the deletion and pause markers.
    pub async fn report_status(
        &mut self,
        client: &dyn ClusterClient,
        engine: &PlatformEngine,
        version: &str,
    ) -> PlatformEngineStatus {
        let previous = engine.status.clone().unwrap_or_default();
        let stamp = now();

        let mut components = Vec::with_capacity(self.components.len());
        for (_, reporter) in &self.components {
            let mut condition = reporter.status(client).await;
            carry_component_times(&mut condition, &previous.components, &stamp);
            components.push(condition);
        }

        let unavailable: Vec<&str> = components
            .iter()
            .filter(|c| !c.available)
            .map(|c| c.name.as_str())
            .collect();
        let all_available = !components.is_empty() && unavailable.is_empty();

        if all_available {
            self.add_condition(new_condition(
                condition_type::AVAILABLE,
                ConditionStatus::True,
                reason::COMPONENTS_AVAILABLE,
                "All components are available",
            ));
        } else if components.is_empty() {
            self.add_condition(new_condition(
                condition_type::AVAILABLE,
                ConditionStatus::False,
                reason::COMPONENTS_UNAVAILABLE,
                "No components are tracked",
            ));
        } else {
            self.add_condition(new_condition(
                condition_type::AVAILABLE,
                ConditionStatus::False,
                reason::COMPONENTS_UNAVAILABLE,
                format!(
                    "The following components are unavailable: {}",
                    unavailable.join(", ")
                ),
            ));
        }

        let mut conditions = self.conditions.clone();
        carry_condition_times(&mut conditions, &previous.conditions);

        let phase = compute_phase(
            &conditions,
            &components,
            engine,
            previous.current_version.as_deref(),
            version,
        );
        debug!(%phase, components = components.len(), "Aggregated status");

        let current_version = if phase == Phase::Available {
            Some(version.to_string())
        } else {
            previous.current_version.clone()
        };

        PlatformEngineStatus {
            phase: Some(phase),
            components,
            conditions,
            current_version,
            desired_version: Some(version.to_string()),
        }
    }
}

/// Keep the persisted transition time while status is unchanged for a component
fn carry_component_times(
    condition: &mut ComponentCondition,
    previous: &[ComponentCondition],
    stamp: &str,
) {
    let prior = previous.iter().find(|p| {
        p.name == condition.name && p.kind == condition.kind && p.r#type == condition.r#type
    });
    condition.last_transition_time = match prior {
        Some(p) if p.status == condition.status => p.last_transition_time.clone(),
        Some(_) => Some(stamp.to_string()),
        None => condition
            .last_transition_time
            .clone()
            .or_else(|| Some(stamp.to_string())),
    };
    condition.last_update_time = Some(stamp.to_string());
}

/// Keep the persisted transition time of top-level conditions whose status is unchanged
fn carry_condition_times(conditions: &mut [Condition], previous: &[Condition]) {
    for condition in conditions {
        if let Some(prior) = previous.iter().find(|p| p.r#type == condition.r#type) {
            if prior.status == condition.status {
                condition.last_transition_time = prior.last_transition_time.clone();
            }
        }
    }
}

fn compute_phase(
    conditions: &[Condition],
    components: &[ComponentCondition],
    engine: &PlatformEngine,
    current_version: Option<&str>,
    version: &str,
) -> Phase {
    let failed = conditions.iter().any(|c| {
        c.r#type == condition_type::PROGRESSING && c.status == ConditionStatus::False
    });
    if failed {
        return Phase::Error;
    }
    if engine.is_deleting() {
        return Phase::Uninstalling;
    }
    if engine.is_paused() {
        return Phase::Paused;
    }
    if components.is_empty() {
        return Phase::Error;
    }
    if components.iter().any(|c| !c.available) {
        return match current_version {
            Some(current) if current != version => Phase::Updating,
            _ => Phase::Progressing,
        };
    }
    Phase::Available
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryCluster;
    use crate::controller::status::StaticStatus;
    use crate::crd::PlatformEngineSpec;

    fn fixed(name: &str, available: bool) -> StaticStatus {
        StaticStatus::new(
            name,
            "ns",
            "",
            ComponentCondition {
                r#type: "Available".to_string(),
                status: ConditionStatus::from_bool(available),
                available,
                ..Default::default()
            },
        )
    }

    fn engine() -> PlatformEngine {
        PlatformEngine::new("engine", PlatformEngineSpec::default())
    }

    #[test]
    fn test_add_component_is_idempotent() {
        let mut tracker = StatusTracker::new();
        tracker.add_component(fixed("a", true));
        tracker.add_component(fixed("a", false));
        assert_eq!(tracker.component_count(), 1);
        tracker.add_component(fixed("b", true));
        assert_eq!(tracker.component_count(), 2);
    }

    #[test]
    fn test_remove_absent_component_is_noop() {
        let mut tracker = StatusTracker::new();
        tracker.add_component(fixed("a", true));
        tracker.remove_component(&fixed("missing", true));
        assert_eq!(tracker.component_count(), 1);
        tracker.remove_component(&fixed("a", true));
        assert_eq!(tracker.component_count(), 0);
    }

    #[tokio::test]
    async fn test_re_added_reporter_replaces_previous() {
        let mut tracker = StatusTracker::new();
        tracker.add_component(fixed("a", false));
        tracker.add_component(fixed("a", true));
        let status = tracker
            .report_status(&InMemoryCluster::new(), &engine(), "1.0.0")
            .await;
        assert_eq!(status.phase, Some(Phase::Available));
    }

    #[tokio::test]
    async fn test_all_available_yields_available_phase_and_version() {
        let mut tracker = StatusTracker::new();
        tracker.add_component(fixed("a", true));
        tracker.add_component(fixed("b", true));
        let status = tracker
            .report_status(&InMemoryCluster::new(), &engine(), "2.0.0")
            .await;
        assert_eq!(status.phase, Some(Phase::Available));
        assert_eq!(status.current_version.as_deref(), Some("2.0.0"));
        assert_eq!(status.desired_version.as_deref(), Some("2.0.0"));
        let available = status
            .conditions
            .iter()
            .find(|c| c.r#type == condition_type::AVAILABLE)
            .unwrap();
        assert_eq!(available.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_one_unavailable_component_blocks_available() {
        let mut tracker = StatusTracker::new();
        tracker.add_component(fixed("a", true));
        tracker.add_component(fixed("b", false));
        let status = tracker
            .report_status(&InMemoryCluster::new(), &engine(), "2.0.0")
            .await;
        assert_eq!(status.phase, Some(Phase::Progressing));
        assert_eq!(status.current_version, None);
        let available = status
            .conditions
            .iter()
            .find(|c| c.r#type == condition_type::AVAILABLE)
            .unwrap();
        assert!(available.message.as_deref().unwrap().contains('b'));
    }

    #[tokio::test]
    async fn test_version_change_while_unready_is_updating() {
        let mut pe = engine();
        pe.status = Some(PlatformEngineStatus {
            current_version: Some("1.0.0".to_string()),
            ..Default::default()
        });
        let mut tracker = StatusTracker::new();
        tracker.add_component(fixed("a", false));
        let status = tracker
            .report_status(&InMemoryCluster::new(), &pe, "2.0.0")
            .await;
        assert_eq!(status.phase, Some(Phase::Updating));
        assert_eq!(status.current_version.as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn test_failed_progressing_condition_is_error() {
        let mut tracker = StatusTracker::new();
        tracker.add_component(fixed("a", true));
        tracker.add_condition(new_condition(
            condition_type::PROGRESSING,
            ConditionStatus::False,
            reason::REQUIREMENTS_NOT_MET,
            "no images",
        ));
        let status = tracker
            .report_status(&InMemoryCluster::new(), &engine(), "1.0.0")
            .await;
        assert_eq!(status.phase, Some(Phase::Error));
    }

    #[tokio::test]
    async fn test_no_components_is_error() {
        let mut tracker = StatusTracker::new();
        let status = tracker
            .report_status(&InMemoryCluster::new(), &engine(), "1.0.0")
            .await;
        assert_eq!(status.phase, Some(Phase::Error));
    }

    #[tokio::test]
    async fn test_component_transition_time_kept_while_status_unchanged() {
        let mut pe = engine();
        pe.status = Some(PlatformEngineStatus {
            components: vec![ComponentCondition {
                name: "a".to_string(),
                kind: "Component".to_string(),
                r#type: "Available".to_string(),
                status: ConditionStatus::True,
                last_transition_time: Some("2020-01-01T00:00:00Z".to_string()),
                last_update_time: Some("2020-01-01T00:00:00Z".to_string()),
                available: true,
                ..Default::default()
            }],
            ..Default::default()
        });

        let mut tracker = StatusTracker::new();
        tracker.add_component(fixed("a", true));
        let status = tracker.report_status(&InMemoryCluster::new(), &pe, "1").await;
        let a = &status.components[0];
        assert_eq!(a.last_transition_time.as_deref(), Some("2020-01-01T00:00:00Z"));
        assert_ne!(a.last_update_time.as_deref(), Some("2020-01-01T00:00:00Z"));

        let mut tracker = StatusTracker::new();
        tracker.add_component(fixed("a", false));
        let status = tracker.report_status(&InMemoryCluster::new(), &pe, "1").await;
        assert_ne!(
            status.components[0].last_transition_time.as_deref(),
            Some("2020-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut tracker = StatusTracker::new();
        tracker.add_component(fixed("a", true));
        tracker.add_condition(new_condition("Progressing", ConditionStatus::True, "x", ""));
        tracker.reset("uid-1");
        assert_eq!(tracker.component_count(), 0);
        assert!(tracker.conditions().is_empty());
        assert_eq!(tracker.uid(), Some("uid-1"));
    }
}
