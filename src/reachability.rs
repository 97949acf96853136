//! Dual-signal reachability
//!
//! Whether an agent can currently receive calls is derived from two weakly
//! consistent signals: the registrar-reported contact URI (with its
//! expiration) and the backend-reported presence. The contact URI is checked
//! first; backend presence is a fallback for when contact data is stale or
//! unavailable. The two can disagree; disagreements are logged, not silently
//! resolved.

use chrono::{DateTime, Utc};

use crate::engine::ContactInfo;
use crate::models::AgentStatus;

/// A `sip:<ext>@offline` contact URI means the registrar considers the
/// contact offline.
pub fn is_offline_uri(uri: &str) -> bool {
    let rest = uri
        .strip_prefix("sips:")
        .or_else(|| uri.strip_prefix("sip:"))
        .unwrap_or(uri);
    match rest.split_once('@') {
        Some((_, host)) => {
            let host = host
                .split(|c| c == ':' || c == ';' || c == '>')
                .next()
                .unwrap_or(host);
            host.eq_ignore_ascii_case("offline")
        }
        None => false,
    }
}

/// Derive reachability from contact data plus backend presence.
///
/// Rule (a): a non-offline contact URI whose registration has not expired
/// (absent expiration counts as valid). Rule (b): the backend explicitly
/// reports the agent online. (a) is checked first; (b) is only a fallback.
pub fn is_reachable(
    contact: &ContactInfo,
    backend: Option<AgentStatus>,
    now: DateTime<Utc>,
) -> bool {
    let uri_online = contact
        .contact_uri
        .as_deref()
        .map(|uri| !is_offline_uri(uri))
        .unwrap_or(false);
    let unexpired = contact.expiration.map(|exp| exp > now).unwrap_or(true);
    let contact_says = uri_online && unexpired;

    let backend_says = backend.map(|status| status.is_online()).unwrap_or(false);

    if contact.contact_uri.is_some() && backend.is_some() && contact_says != backend_says {
        tracing::warn!(
            contact_uri = contact.contact_uri.as_deref().unwrap_or(""),
            unexpired,
            backend_status = %backend.unwrap(),
            "reachability signals disagree (contact={}, backend={})",
            contact_says,
            backend_says,
        );
    }

    contact_says || backend_says
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn contact(uri: Option<&str>, expiration: Option<DateTime<Utc>>) -> ContactInfo {
        ContactInfo {
            contact_uri: uri.map(|u| u.to_string()),
            expiration,
        }
    }

    #[test]
    fn test_offline_uri_detection() {
        assert!(is_offline_uri("sip:1001@offline"));
        assert!(is_offline_uri("sips:1001@OFFLINE"));
        assert!(is_offline_uri("sip:1001@offline;transport=udp"));
        assert!(!is_offline_uri("sip:1001@10.0.0.5"));
        assert!(!is_offline_uri("sip:1001@offline.example.com"));
        assert!(!is_offline_uri("1001"));
    }

    #[test]
    fn test_backend_fallback_applies_when_contact_is_offline() {
        let now = Utc::now();
        let info = contact(Some("sip:1001@offline"), None);
        assert!(is_reachable(&info, Some(AgentStatus::Registered), now));
    }

    #[test]
    fn test_expired_contact_and_offline_backend_is_unreachable() {
        let now = Utc::now();
        let info = contact(Some("sip:1001@10.0.0.5"), Some(now - Duration::seconds(10)));
        assert!(!is_reachable(&info, Some(AgentStatus::Offline), now));
    }

    #[test]
    fn test_valid_contact_alone_is_reachable() {
        let now = Utc::now();
        let info = contact(Some("sip:1001@10.0.0.5"), Some(now + Duration::seconds(600)));
        assert!(is_reachable(&info, None, now));
        assert!(is_reachable(&info, Some(AgentStatus::Offline), now));
    }

    #[test]
    fn test_absent_expiration_counts_as_valid() {
        let now = Utc::now();
        let info = contact(Some("sip:1001@10.0.0.5"), None);
        assert!(is_reachable(&info, None, now));
    }

    #[test]
    fn test_no_signals_means_unreachable() {
        let now = Utc::now();
        assert!(!is_reachable(&contact(None, None), None, now));
    }
}
