//! Type definitions for the mdns-lifecycle library

use crate::error::{MdnsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest name or protocol accepted when building a registration type.
///
/// Each becomes one DNS label once prefixed with `_`, and DNS labels are capped at 63 bytes.
pub const MAX_TYPE_LABEL_LEN: usize = 62;

/// Service category: `name` and `protocol` form the `_<name>._<protocol>` registration type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ServiceType {
    /// Service name without leading underscore (e.g. "temp", "http")
    pub name: String,
    /// Transport protocol without leading underscore (e.g. "tcp", "udp")
    pub protocol: String,
    /// Ordered subtypes, possibly empty
    #[serde(default)]
    pub subtypes: Vec<String>,
}

impl ServiceType {
    /// Create a new service type with no subtypes
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, protocol: S2) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into(),
            subtypes: Vec::new(),
        }
    }

    /// Add a subtype
    pub fn with_subtype<S: Into<String>>(mut self, subtype: S) -> Self {
        self.subtypes.push(subtype.into());
        self
    }

    /// Build the `_<name>._<protocol>` registration type.
    ///
    /// Both parts must be non-empty, must not contain `.`, and must fit in
    /// [`MAX_TYPE_LABEL_LEN`] bytes.
    pub fn registration_type(&self) -> Result<String> {
        check_label("name", &self.name)?;
        check_label("protocol", &self.protocol)?;
        Ok(format!("_{}._{}", self.name, self.protocol))
    }

    /// Check if the service type satisfies the description invariants
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.protocol.is_empty()
    }
}

fn check_label(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(MdnsError::invalid_registration_type(format!(
            "service type {field} cannot be empty"
        )));
    }
    if value.contains('.') {
        return Err(MdnsError::invalid_registration_type(format!(
            "service type {field} '{value}' must not contain '.'"
        )));
    }
    if value.len() > MAX_TYPE_LABEL_LEN {
        return Err(MdnsError::invalid_registration_type(format!(
            "service type {field} is {} bytes, limit is {MAX_TYPE_LABEL_LEN}",
            value.len()
        )));
    }
    Ok(())
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}._{}", self.name, self.protocol)
    }
}

/// Lifecycle status carried by a service description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// Not yet advertised or freshly parsed
    #[default]
    Unknown,
    /// Advertised successfully
    Registered,
    /// Advertisement failed
    Failed,
    /// Reported by a browse as present on the network
    Discovered,
    /// Reported by a browse as gone from the network
    Removed,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Unknown => write!(f, "unknown"),
            ServiceStatus::Registered => write!(f, "registered"),
            ServiceStatus::Failed => write!(f, "failed"),
            ServiceStatus::Discovered => write!(f, "discovered"),
            ServiceStatus::Removed => write!(f, "removed"),
        }
    }
}

/// How much a discovery result is populated before it reaches the callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DiscoveryMode {
    /// Deliver as soon as the instance name is browsed; only name and type are set
    NameOnly,
    /// Wait for the resolver to resolve host, port and TXT record
    #[default]
    Resolve,
}
