// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subscription filters.

use zapline_core::{CanonicalEvent, ConnectionId, TenantId};

/// Which events a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
    /// Every event, for supervisory and monitoring views.
    All,
    Connection(ConnectionId),
    /// Events of connections created on behalf of this tenant.
    Tenant(TenantId),
}

impl SubscriptionFilter {
    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        match self {
            Self::All => true,
            Self::Connection(id) => event.connection_id == *id,
            Self::Tenant(tenant) => event.tenant_id.as_ref() == Some(tenant),
        }
    }
}

#[cfg(test)]
mod tests {
    use zapline_core::{ErrorCode, EventKind};

    use super::*;

    fn event(conn: &str, tenant: Option<&str>) -> CanonicalEvent {
        CanonicalEvent::new(
            ConnectionId::from(conn),
            tenant.map(TenantId::from),
            EventKind::Failure {
                code: ErrorCode::Internal,
                message: "x".into(),
            },
        )
    }

    #[test]
    fn tenant_filter_ignores_untagged_events() {
        let filter = SubscriptionFilter::Tenant(TenantId::from("t1"));
        assert!(filter.matches(&event("c1", Some("t1"))));
        assert!(!filter.matches(&event("c1", Some("t2"))));
        assert!(!filter.matches(&event("c1", None)));
    }

    #[test]
    fn connection_filter_matches_by_id() {
        let filter = SubscriptionFilter::Connection(ConnectionId::from("c1"));
        assert!(filter.matches(&event("c1", None)));
        assert!(!filter.matches(&event("c10", None)));
        assert!(SubscriptionFilter::All.matches(&event("anything", None)));
    }
}
