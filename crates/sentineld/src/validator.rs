//! Declarative shape checks for probe payloads.
//!
//! One schema per probe kind: required fields and coarse expected types,
//! not full structural typing. Validation only flags a broken payload; it
//! never repairs, removes, or aborts anything. The caller logs a
//! `validation_failed` meta-event and carries on.

use sentinel_common::ProbeKind;
use serde_json::Value;

/// Coarse expected type of a required payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Str,
    Object,
    Array,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Bool => value.is_boolean(),
            Self::Int => value.is_i64() || value.is_u64(),
            // Integers satisfy a float expectation.
            Self::Float => value.is_number(),
            Self::Str => value.is_string(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Required fields per probe kind. Optional fields (pid, latencies) are
/// deliberately absent: they may be null when the finding is negative.
pub fn schema_for(kind: ProbeKind) -> &'static [(&'static str, FieldType)] {
    match kind {
        ProbeKind::ProcessStatus => &[("running", FieldType::Bool)],
        ProbeKind::Internet => &[("internet_reachable", FieldType::Bool)],
        ProbeKind::DnsResolution => &[("dns_working", FieldType::Bool)],
        ProbeKind::Services => &[("services", FieldType::Object)],
        ProbeKind::NetworkAdapters => &[("adapters_json", FieldType::Str)],
        ProbeKind::RoutingTable => &[("routing_table", FieldType::Str)],
        ProbeKind::DnsServers => &[("dns_servers", FieldType::Str)],
        ProbeKind::ActiveConnections => &[("connections", FieldType::Str)],
        ProbeKind::SystemEvents => &[("system_events", FieldType::Str)],
    }
}

/// Check a successful probe payload against its declared schema.
pub fn validate(kind: ProbeKind, payload: &Value) -> bool {
    let Some(object) = payload.as_object() else {
        return false;
    };

    schema_for(kind).iter().all(|(field, expected)| {
        object.get(*field).is_some_and(|value| expected.matches(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_payloads_pass() {
        assert!(validate(
            ProbeKind::ProcessStatus,
            &json!({"running": true, "pid": 91, "cpu_percent": 0.3})
        ));
        assert!(validate(
            ProbeKind::Services,
            &json!({"services": {"gitea": {"reachable": true}}})
        ));
        assert!(validate(
            ProbeKind::RoutingTable,
            &json!({"routing_table": "default via 10.0.0.1"})
        ));
    }

    #[test]
    fn missing_required_field_fails() {
        assert!(!validate(ProbeKind::ProcessStatus, &json!({"pid": 91})));
        assert!(!validate(ProbeKind::Internet, &json!({})));
    }

    #[test]
    fn wrong_type_fails() {
        assert!(!validate(
            ProbeKind::ProcessStatus,
            &json!({"running": "yes"})
        ));
        assert!(!validate(
            ProbeKind::Services,
            &json!({"services": [1, 2, 3]})
        ));
    }

    #[test]
    fn non_object_payload_fails() {
        assert!(!validate(ProbeKind::ProcessStatus, &json!(null)));
        assert!(!validate(ProbeKind::ProcessStatus, &json!("running")));
    }

    #[test]
    fn integers_satisfy_float_expectations() {
        assert!(FieldType::Float.matches(&json!(3)));
        assert!(FieldType::Float.matches(&json!(3.5)));
        assert!(!FieldType::Int.matches(&json!(3.5)));
    }

    #[test]
    fn every_probe_kind_has_a_schema() {
        for kind in [
            ProbeKind::ProcessStatus,
            ProbeKind::Internet,
            ProbeKind::DnsResolution,
            ProbeKind::Services,
            ProbeKind::NetworkAdapters,
            ProbeKind::RoutingTable,
            ProbeKind::DnsServers,
            ProbeKind::ActiveConnections,
            ProbeKind::SystemEvents,
        ] {
            assert!(!schema_for(kind).is_empty());
        }
    }
}
