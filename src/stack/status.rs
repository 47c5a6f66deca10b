//! Container status classification.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub service_name: String,
    pub raw_status_text: String,
    pub weight: f64,
}

impl ServiceStatus {
    pub fn new(service_name: impl Into<String>, raw_status_text: impl Into<String>) -> Self {
        let raw_status_text = raw_status_text.into();
        Self {
            service_name: service_name.into(),
            weight: status_weight(&raw_status_text),
            raw_status_text,
        }
    }
}

/// Readiness estimate for one container from its engine status text,
/// e.g. `Up 3 minutes (healthy)` or `Exited (1) 2 seconds ago`.
pub fn status_weight(status: &str) -> f64 {
    let s = status.trim().to_ascii_lowercase();
    if s.contains("(unhealthy)") {
        0.5
    } else if s.contains("(healthy)") {
        1.0
    } else if s.contains("(health: starting)") {
        0.75
    } else if s.starts_with("up") && s.contains("(paused)") {
        0.5
    } else if s.starts_with("restarting") {
        0.5
    } else if s.starts_with("up") {
        0.9
    } else if s.starts_with("created") {
        0.35
    } else if s.starts_with("exited") {
        0.15
    } else if s.starts_with("dead") || s.starts_with("removal in progress") || s.starts_with("removing") {
        0.1
    } else {
        0.0
    }
}

/// Parse `service<TAB>status` lines. Containers without a service label are
/// not part of the stack and are skipped.
pub fn parse_status_listing(listing: &str) -> Vec<ServiceStatus> {
    listing
        .lines()
        .filter_map(|line| {
            let (service, status) = line.split_once('\t')?;
            let service = service.trim();
            (!service.is_empty()).then(|| ServiceStatus::new(service, status.trim()))
        })
        .collect()
}

/// Mean weight over the complete expected service list, in 0..=1.
///
/// A service with no container yet weighs 0. A scaled service counts once,
/// at the weight of its least ready replica.
pub fn aggregate_progress(expected: &[String], statuses: &[ServiceStatus]) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }
    let sum: f64 = expected
        .iter()
        .map(|name| {
            statuses
                .iter()
                .filter(|s| &s.service_name == name)
                .map(|s| s.weight)
                .reduce(f64::min)
                .unwrap_or(0.0)
        })
        .sum();
    sum / expected.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_status_weights() {
        assert_eq!(status_weight("Up 2 minutes (healthy)"), 1.0);
        assert_eq!(status_weight("Up 3 seconds"), 0.9);
        assert_eq!(status_weight("Up 3 seconds (health: starting)"), 0.75);
        assert_eq!(status_weight("Up 1 minute (unhealthy)"), 0.5);
        assert_eq!(status_weight("Up 5 minutes (Paused)"), 0.5);
        assert_eq!(status_weight("Restarting (1) 4 seconds ago"), 0.5);
        assert_eq!(status_weight("Created"), 0.35);
        assert_eq!(status_weight("Exited (0) 10 seconds ago"), 0.15);
        assert_eq!(status_weight("Dead"), 0.1);
        assert_eq!(status_weight("Removal In Progress"), 0.1);
        assert_eq!(status_weight("something new"), 0.0);
    }

    #[test]
    fn test_parse_listing_skips_unlabeled() {
        let statuses = parse_status_listing("api\tUp 3 seconds (healthy)\n\tUp 1 hour\nweb\tCreated\n\n");
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].service_name, "api");
        assert_eq!(statuses[0].weight, 1.0);
        assert_eq!(statuses[1].raw_status_text, "Created");
    }

    #[test]
    fn test_aggregate_counts_missing_services_as_zero() {
        let expected = names(&["api", "web", "redis", "worker"]);
        let statuses = parse_status_listing("api\tUp 1 minute (healthy)\nweb\tUp 1 minute (healthy)\n");
        assert_eq!(aggregate_progress(&expected, &statuses), 0.5);
    }

    #[test]
    fn test_aggregate_ignores_containers_outside_expected_list() {
        let expected = names(&["api"]);
        let statuses = parse_status_listing("api\tCreated\nstray\tUp 1 hour (healthy)\n");
        assert_eq!(aggregate_progress(&expected, &statuses), 0.35);
    }

    #[test]
    fn test_aggregate_uses_slowest_replica() {
        let expected = names(&["worker"]);
        let statuses = parse_status_listing("worker\tUp 1 minute (healthy)\nworker\tCreated\n");
        assert_eq!(aggregate_progress(&expected, &statuses), 0.35);
    }

    #[test]
    fn test_aggregate_of_empty_stack_is_complete() {
        assert_eq!(aggregate_progress(&[], &[]), 1.0);
    }
}
