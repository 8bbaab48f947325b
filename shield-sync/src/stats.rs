use crate::models::{Incident, Unit};
use serde::Serialize;
use std::collections::BTreeMap;

/// Figures shown on the dashboard stat panels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub incident_count: usize,
    pub critical_incidents: usize,
    pub incidents_by_severity: BTreeMap<String, usize>,
    pub unit_count: usize,
    /// Units on patrol or assignment, i.e. anything but Idle
    pub active_unit_count: usize,
}

pub fn compute_stats(incidents: &[Incident], units: &[Unit]) -> DashboardStats {
    let mut by_severity = BTreeMap::new();
    for incident in incidents {
        let severity = if incident.severity.trim().is_empty() {
            "Unknown".to_string()
        } else {
            incident.severity.clone()
        };
        *by_severity.entry(severity).or_insert(0) += 1;
    }

    DashboardStats {
        incident_count: incidents.len(),
        critical_incidents: incidents
            .iter()
            .filter(|i| i.severity.eq_ignore_ascii_case("critical"))
            .count(),
        incidents_by_severity: by_severity,
        unit_count: units.len(),
        active_unit_count: units
            .iter()
            .filter(|u| !u.status.eq_ignore_ascii_case("idle"))
            .count(),
    }
}
