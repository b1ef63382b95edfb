//! Service description and query types

use crate::{
    error::{MdnsError, Result},
    types::{ServiceStatus, ServiceType},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, fmt, net::IpAddr};

/// A service to advertise, or a service reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescription {
    /// Instance name of the service (e.g. "Temp1")
    pub service_name: String,
    /// Service category
    pub service_type: ServiceType,
    /// Port the service listens on
    pub port: u16,
    /// Metadata as compact JSON object text
    pub properties: String,
    /// Lifecycle status
    pub status: ServiceStatus,
    /// Host name, set on resolved discovery results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Addresses, set on resolved discovery results
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<IpAddr>,
}

impl ServiceDescription {
    /// Create a new description with empty properties
    pub fn new(name: impl Into<String>, service_type: ServiceType, port: u16) -> Self {
        Self {
            service_name: name.into(),
            service_type,
            port,
            properties: "{}".to_string(),
            status: ServiceStatus::Unknown,
            host: None,
            addresses: Vec::new(),
        }
    }

    /// Set properties from a JSON object
    pub fn with_properties(mut self, properties: &serde_json::Map<String, Value>) -> Self {
        self.properties = Value::Object(properties.clone()).to_string();
        self
    }

    /// Set a single property, keeping the existing ones
    pub fn with_property<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Result<Self> {
        let mut map = self.properties_map()?;
        map.insert(key.into(), value.into());
        self.properties = Value::Object(map).to_string();
        Ok(self)
    }

    /// Set the status
    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    /// Get service name
    pub fn name(&self) -> &str {
        &self.service_name
    }

    /// Get service type
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    /// Check the data-model invariants
    pub fn is_valid(&self) -> bool {
        !self.service_name.is_empty() && self.service_type.is_valid()
    }

    /// Properties decoded back into a JSON object. Empty text counts as `{}`.
    pub fn properties_map(&self) -> Result<serde_json::Map<String, Value>> {
        if self.properties.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        match serde_json::from_str::<Value>(&self.properties) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(MdnsError::invalid_format(
                &self.service_name,
                "properties must be a JSON object",
            )),
            Err(e) => Err(MdnsError::invalid_format(
                &self.service_name,
                format!("properties are not valid JSON: {e}"),
            )),
        }
    }

    /// Properties as TXT record key/value pairs.
    ///
    /// String values are used verbatim; every other value is written as compact JSON.
    pub fn txt_properties(&self) -> Result<HashMap<String, String>> {
        Ok(self
            .properties_map()?
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect())
    }
}

impl fmt::Display for ServiceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) port {} [{}]",
            self.service_name, self.service_type, self.port, self.status
        )
    }
}

/// What to browse for: a service type without name, port or properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceQuery {
    /// Service category to browse
    pub service_type: ServiceType,
}

impl ServiceQuery {
    /// Create a new query
    pub fn new(service_type: ServiceType) -> Self {
        Self { service_type }
    }
}

impl From<&ServiceDescription> for ServiceQuery {
    fn from(description: &ServiceDescription) -> Self {
        Self {
            service_type: description.service_type.clone(),
        }
    }
}

impl From<ServiceType> for ServiceQuery {
    fn from(service_type: ServiceType) -> Self {
        Self { service_type }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_description_creation() {
        let description = ServiceDescription::new("Temp1", ServiceType::new("temp", "tcp"), 8080);
        assert_eq!(description.name(), "Temp1");
        assert_eq!(description.properties, "{}");
        assert_eq!(description.status, ServiceStatus::Unknown);
        assert!(description.is_valid());
        assert!(!ServiceDescription::new("", ServiceType::new("temp", "tcp"), 1).is_valid());
    }

    #[test]
    fn test_txt_properties() -> Result<()> {
        let description = ServiceDescription::new("Temp1", ServiceType::new("temp", "tcp"), 8080)
            .with_property("unit", "celsius")?
            .with_property("precision", 2)?
            .with_property("tags", json!(["a", "b"]))?;

        let txt = description.txt_properties()?;
        assert_eq!(txt.get("unit").map(String::as_str), Some("celsius"));
        assert_eq!(txt.get("precision").map(String::as_str), Some("2"));
        assert_eq!(txt.get("tags").map(String::as_str), Some(r#"["a","b"]"#));
        Ok(())
    }

    #[test]
    fn test_empty_properties_text() -> Result<()> {
        let mut description = ServiceDescription::new("Temp1", ServiceType::new("temp", "tcp"), 8080);
        description.properties = String::new();
        assert!(description.txt_properties()?.is_empty());

        description.properties = "[1,2]".to_string();
        assert!(description.txt_properties().is_err());
        Ok(())
    }

    #[test]
    fn test_query_from_description() {
        let description = ServiceDescription::new(
            "Temp1",
            ServiceType::new("temp", "tcp").with_subtype("indoor"),
            8080,
        );
        let query = ServiceQuery::from(&description);
        assert_eq!(query.service_type, description.service_type);
    }
}
