//! Typed errors for the discovery protocol.
//!
//! Every error that can reach an agent carries enough context to act on:
//! the valid alternatives for a missing name, the capability that blocked a
//! mutation, or the fields missing from a key. The tool boundary serializes
//! these with [`DiscoveryError::to_payload`] instead of letting them
//! propagate as opaque strings.
//!
//! # Error Codes
//!
//! | Variant | Code | HTTP |
//! |---------|------|------|
//! | [`Configuration`](DiscoveryError::Configuration) | `configuration_error` | 500 |
//! | [`NotFound`](DiscoveryError::NotFound) | `not_found` | 404 |
//! | [`Capability`](DiscoveryError::Capability) | `capability_error` | 400 |
//! | [`Validation`](DiscoveryError::Validation) | `validation_error` | 400 |
//! | [`Upstream`](DiscoveryError::Upstream) | `upstream_error` | 502 |

use serde_json::{json, Value};

/// Errors surfaced by the classifier, the metadata cache, and the
/// discovery protocol.
///
/// `Clone` so a single failed in-flight fetch can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DiscoveryError {
    /// A classifier rule failed to compile. Fatal at startup.
    #[error("invalid pattern '{pattern}' in domain '{domain}': {message}")]
    Configuration {
        domain: String,
        pattern: String,
        message: String,
    },

    /// An unknown service or entity was requested.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// `"service"` or `"entity"`.
        kind: String,
        name: String,
        /// Valid names the caller can use instead.
        available: Vec<String>,
        remediation: String,
    },

    /// The entity's schema does not allow the requested mutation.
    #[error("operation '{operation}' is not allowed on {service_id}/{entity}: entity is not {capability}")]
    Capability {
        service_id: String,
        entity: String,
        operation: String,
        /// `"creatable"`, `"updatable"`, or `"deletable"`.
        capability: String,
    },

    /// The request is malformed (bad operation name, missing key fields, ...).
    #[error("{message}")]
    Validation {
        message: String,
        /// Fields the caller must supply.
        missing: Vec<String>,
        /// Accepted values, when the error is about a closed set.
        valid: Vec<String>,
    },

    /// A collaborator (catalog, schema, embedding, data) failed.
    #[error("{provider} provider failed for '{key}': {message}")]
    Upstream {
        provider: String,
        key: String,
        message: String,
    },
}

impl DiscoveryError {
    pub fn validation(message: impl Into<String>) -> Self {
        DiscoveryError::Validation {
            message: message.into(),
            missing: Vec::new(),
            valid: Vec::new(),
        }
    }

    pub fn upstream(
        provider: impl Into<String>,
        key: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        DiscoveryError::Upstream {
            provider: provider.into(),
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DiscoveryError::Configuration { .. } => "configuration_error",
            DiscoveryError::NotFound { .. } => "not_found",
            DiscoveryError::Capability { .. } => "capability_error",
            DiscoveryError::Validation { .. } => "validation_error",
            DiscoveryError::Upstream { .. } => "upstream_error",
        }
    }

    /// Human-readable next step for the caller.
    pub fn remediation(&self) -> String {
        match self {
            DiscoveryError::Configuration { domain, .. } => {
                format!("fix the patterns of domain '{}' in the classification config", domain)
            }
            DiscoveryError::NotFound { remediation, .. } => remediation.clone(),
            DiscoveryError::Capability { capability, .. } => format!(
                "the entity schema marks this entity as not {}; use a read operation or another entity",
                capability
            ),
            DiscoveryError::Validation { missing, valid, .. } => {
                if !missing.is_empty() {
                    format!("supply values for: {}", missing.join(", "))
                } else if !valid.is_empty() {
                    format!("use one of: {}", valid.join(", "))
                } else {
                    "correct the request parameters".to_string()
                }
            }
            DiscoveryError::Upstream { provider, .. } => {
                format!("the {} provider is unavailable; retry later", provider)
            }
        }
    }

    /// Structured JSON error payload:
    /// `{"error": {"code", "message", "remediation", "details"}}`.
    pub fn to_payload(&self) -> Value {
        let details = match self {
            DiscoveryError::Configuration {
                domain, pattern, ..
            } => json!({ "domain": domain, "pattern": pattern }),
            DiscoveryError::NotFound {
                kind,
                name,
                available,
                ..
            } => json!({ "kind": kind, "name": name, "available": available }),
            DiscoveryError::Capability {
                service_id,
                entity,
                operation,
                capability,
            } => json!({
                "service_id": service_id,
                "entity": entity,
                "operation": operation,
                "capability": capability,
            }),
            DiscoveryError::Validation { missing, valid, .. } => {
                json!({ "missing": missing, "valid": valid })
            }
            DiscoveryError::Upstream { provider, key, .. } => {
                json!({ "provider": provider, "key": key })
            }
        };

        json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "remediation": self.remediation(),
                "details": details,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_payload_lists_alternatives() {
        let err = DiscoveryError::NotFound {
            kind: "entity".to_string(),
            name: "NoSuchEntity".to_string(),
            available: vec!["Customer".to_string(), "Invoice".to_string()],
            remediation: "use one of the available entities".to_string(),
        };
        let payload = err.to_payload();
        assert_eq!(payload["error"]["code"], "not_found");
        assert_eq!(
            payload["error"]["details"]["available"],
            json!(["Customer", "Invoice"])
        );
    }

    #[test]
    fn test_validation_remediation_prefers_missing_fields() {
        let err = DiscoveryError::Validation {
            message: "missing key fields".to_string(),
            missing: vec!["CompanyCode".to_string()],
            valid: vec![],
        };
        assert_eq!(err.remediation(), "supply values for: CompanyCode");
    }

    #[test]
    fn test_capability_message_names_capability() {
        let err = DiscoveryError::Capability {
            service_id: "S".to_string(),
            entity: "E".to_string(),
            operation: "create".to_string(),
            capability: "creatable".to_string(),
        };
        assert!(err.to_string().contains("not creatable"));
        assert_eq!(err.code(), "capability_error");
    }
}
