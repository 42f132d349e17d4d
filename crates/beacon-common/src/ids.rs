//! Identifier validation shared by the catalog and the transport layer.

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static regex is valid"));

/// `serviceId` / `instanceId` must be non-empty and match `^[A-Za-z0-9._-]+$`.
pub fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty() && IDENTIFIER.is_match(value)
}

/// Monotonic event id: `{serviceId}-{instanceId}-{monotonic-nanos}`.
pub fn event_id(service_id: &str, instance_id: &str, nanos: u64) -> String {
    format!("{service_id}-{instance_id}-{nanos}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_identifiers() {
        assert!(is_valid_identifier("orders"));
        assert!(is_valid_identifier("order-service.v2_1"));
    }

    #[test]
    fn rejects_blank_and_illegal_characters() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("orders/v1"));
        assert!(!is_valid_identifier("orders v1"));
    }

    #[test]
    fn event_id_format() {
        assert_eq!(event_id("orders", "o1", 42), "orders-o1-42");
    }
}
