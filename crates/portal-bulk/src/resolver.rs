//! Pure target resolution: union of an explicit
//! list and a `TargetFilter` applied to the current server catalog.

use portal_types::{HealthStatus, ServerName, ServerState, ServerStatus, TargetFilter};
use std::collections::BTreeSet;

fn matches_filter(server: &ServerState, filter: &TargetFilter) -> bool {
    if !filter.statuses.is_empty() && !filter.statuses.contains(&server.status) {
        return false;
    }
    if filter.healthy_only && server.health_status != HealthStatus::Healthy {
        return false;
    }
    if filter.running_only && server.status != ServerStatus::Running {
        return false;
    }
    if let Some(pattern) = &filter.name_pattern_include {
        if !server.name.as_str().contains(pattern.as_str()) {
            return false;
        }
    }
    if let Some(pattern) = &filter.name_pattern_exclude {
        if server.name.as_str().contains(pattern.as_str()) {
            return false;
        }
    }
    if filter.exclude.contains(&server.name) {
        return false;
    }
    // `categories`/`tags` are not part of the `ServerState` data model this
    // registry maintains; they are accepted in the filter contract for
    // forward compatibility with a future catalog attribute and otherwise
    // ignored here.
    true
}

/// Resolves the target set for one `BulkOperationRequest`: the union
/// of `explicit_targets` and whatever in `catalog` matches `filter`,
/// de-duplicated. Empty result is the caller's `ErrNoTargets` signal.
pub fn resolve_targets(
    explicit_targets: &[ServerName],
    filter: Option<&TargetFilter>,
    catalog: &[ServerState],
) -> Vec<ServerName> {
    let mut resolved: BTreeSet<ServerName> = explicit_targets.iter().cloned().collect();

    if let Some(filter) = filter {
        for server in catalog {
            if matches_filter(server, filter) {
                resolved.insert(server.name.clone());
            }
        }
    }

    resolved.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::{TenantId, UserId};

    fn server(name: &str, status: ServerStatus, health: HealthStatus) -> ServerState {
        let mut s = ServerState::new(ServerName::new(name), TenantId::new(), UserId::new(), chrono::Duration::seconds(30));
        s.status = status;
        s.health_status = health;
        s
    }

    #[test]
    fn union_of_explicit_and_filtered() {
        let catalog = vec![
            server("alpha", ServerStatus::Running, HealthStatus::Healthy),
            server("beta", ServerStatus::Stopped, HealthStatus::Unknown),
        ];
        let filter = TargetFilter { running_only: true, ..Default::default() };
        let resolved = resolve_targets(&[ServerName::new("beta")], Some(&filter), &catalog);
        assert_eq!(resolved, vec![ServerName::new("alpha"), ServerName::new("beta")]);
    }

    #[test]
    fn healthy_only_excludes_unhealthy_servers() {
        let catalog = vec![
            server("alpha", ServerStatus::Running, HealthStatus::Healthy),
            server("beta", ServerStatus::Running, HealthStatus::Unhealthy),
        ];
        let filter = TargetFilter { healthy_only: true, ..Default::default() };
        let resolved = resolve_targets(&[], Some(&filter), &catalog);
        assert_eq!(resolved, vec![ServerName::new("alpha")]);
    }

    #[test]
    fn explicit_exclude_wins_over_pattern_include() {
        let catalog = vec![server("alpha-1", ServerStatus::Running, HealthStatus::Healthy)];
        let filter = TargetFilter {
            name_pattern_include: Some("alpha".into()),
            exclude: vec![ServerName::new("alpha-1")],
            ..Default::default()
        };
        let resolved = resolve_targets(&[], Some(&filter), &catalog);
        assert!(resolved.is_empty());
    }

    #[test]
    fn no_targets_resolves_empty() {
        let resolved = resolve_targets(&[], None, &[]);
        assert!(resolved.is_empty());
    }
}
