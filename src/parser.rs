//! Service description parsing
//!
//! A description file looks like:
//!
//! ```json
//! {
//!     "name": "Temp1",
//!     "type": { "name": "temp", "protocol": "tcp", "subtypes": [] },
//!     "port": 8080,
//!     "properties": { "unit": "celsius" }
//! }
//! ```
//!
//! Validation is all-or-nothing: the first failed check aborts the parse and no
//! description is returned.

use crate::{
    error::{MdnsError, Result},
    service::ServiceDescription,
    types::{ServiceStatus, ServiceType},
};
use serde_json::{Map, Value};
use std::{fs, io, path::Path};
use tracing::debug;

/// Read and validate a service description file
pub fn parse_service_description<P: AsRef<Path>>(path: P) -> Result<ServiceDescription> {
    let path = path.as_ref();
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MdnsError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(MdnsError::Io(e)),
    };

    parse_bytes(&content, path)
}

/// Validate a service description held in memory.
///
/// `origin` names the document in error messages.
pub fn parse_service_description_str<P: AsRef<Path>>(
    content: &str,
    origin: P,
) -> Result<ServiceDescription> {
    parse_bytes(content.as_bytes(), origin.as_ref())
}

/// Invalid UTF-8 is reported by the JSON parser with its position, like any other syntax error
fn parse_bytes(content: &[u8], origin: &Path) -> Result<ServiceDescription> {
    let json: Value = serde_json::from_slice(content).map_err(|e| MdnsError::MalformedJson {
        path: origin.to_path_buf(),
        line: e.line(),
        column: e.column(),
        message: e.to_string(),
    })?;

    let root = json
        .as_object()
        .ok_or_else(|| MdnsError::invalid_format(origin, "root must be an object"))?;

    let service_name = string_field(root, "name", origin)?;

    let type_obj = root
        .get("type")
        .and_then(Value::as_object)
        .ok_or_else(|| MdnsError::invalid_format(origin, "'type' must be an object"))?;
    let type_name = string_field(type_obj, "name", origin)?;
    let protocol = string_field(type_obj, "protocol", origin)?;

    let subtypes = type_obj
        .get("subtypes")
        .and_then(Value::as_array)
        .ok_or_else(|| MdnsError::invalid_format(origin, "'type.subtypes' must be an array"))?
        .iter()
        .map(|entry| {
            entry.as_str().map(str::to_string).ok_or_else(|| {
                MdnsError::invalid_format(origin, "'type.subtypes' entries must be strings")
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let port = root
        .get("port")
        .filter(|v| v.is_number())
        .ok_or_else(|| MdnsError::invalid_format(origin, "'port' must be a number"))?
        .as_u64()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| {
            MdnsError::invalid_format(origin, "'port' must be an integer between 0 and 65535")
        })?;

    let properties = root
        .get("properties")
        .filter(|v| v.is_object())
        .ok_or_else(|| MdnsError::invalid_format(origin, "'properties' must be an object"))?
        .to_string();

    if service_name.is_empty() || type_name.is_empty() || protocol.is_empty() {
        return Err(MdnsError::invalid_format(
            origin,
            "'name', 'type.name' and 'type.protocol' must not be empty",
        ));
    }

    let description = ServiceDescription {
        service_name,
        service_type: ServiceType {
            name: type_name,
            protocol,
            subtypes,
        },
        port,
        properties,
        status: ServiceStatus::Unknown,
        host: None,
        addresses: Vec::new(),
    };

    debug!("Parsed service description {} from {}", description, origin.display());
    Ok(description)
}

fn string_field(object: &Map<String, Value>, key: &str, origin: &Path) -> Result<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MdnsError::invalid_format(origin, format!("'{key}' must be a string")))
}
