//! # mDNS Lifecycle
//!
//! Event-driven advertisement and discovery of mDNS / DNS-SD services.
//!
//! Services are described by small JSON documents, advertised on the local network
//! and browsed for by type. Every advertise or discover call submits its request and
//! returns an [`OperationHandle`]; once the handle is started, what happens
//! (registration confirmed, name conflict, service found or lost, resolver failure)
//! is delivered to a callback from a background worker owned by the operation.
//!
//! ## Features
//!
//! - JSON service descriptions with precise parse errors
//! - Non-blocking advertise and discover returning cancellable handles
//! - One worker per operation, with exactly-once session teardown
//! - Per-operation error reporting alongside a process-wide last error
//! - Pluggable resolver backend, `mdns-sd` by default
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mdns_lifecycle::{
//!     config::EngineConfig,
//!     orchestrator::ServiceOrchestrator,
//!     parser::parse_service_description_str,
//!     service::ServiceQuery,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let description = parse_service_description_str(
//!         r#"{
//!             "name": "Temp1",
//!             "type": {"name": "temp", "protocol": "tcp", "subtypes": []},
//!             "port": 8080,
//!             "properties": {"unit": "celsius"}
//!         }"#,
//!         "inline",
//!     )?;
//!
//!     let orchestrator = ServiceOrchestrator::mdns(EngineConfig::default())?;
//!
//!     let advert = orchestrator.advertise(&description, |_, code, _| {
//!         println!("advertise: {code}");
//!     })?;
//!     advert.start();
//!
//!     let browse = orchestrator.discover(&ServiceQuery::from(&description), |_, code, service| {
//!         if let Some(service) = service {
//!             println!("discover: {code} {service}");
//!         }
//!     })?;
//!     browse.start();
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     browse.cancel();
//!     advert.cancel();
//!     advert.terminated().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Parsing and submission failures are returned as [`MdnsError`]. A submission
//! failure is also reported to the callback exactly once before the call returns.
//! Failures after submission are only seen through the callback's [`ErrorCode`]
//! and [`OperationHandle::last_error`].

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
mod event_loop;
pub mod operation;
pub mod orchestrator;
pub mod parser;
pub mod resolver;
pub mod service;
pub mod types;

pub use config::EngineConfig;
pub use error::{ErrorCode, MdnsError, Result, last_error};
pub use operation::{OperationHandle, OperationKind, OperationState};
pub use orchestrator::ServiceOrchestrator;
pub use parser::{parse_service_description, parse_service_description_str};
pub use service::{ServiceDescription, ServiceQuery};
pub use types::{DiscoveryMode, ServiceStatus, ServiceType};
