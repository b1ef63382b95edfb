//! Resolver subsystem boundary
//!
//! The engine never speaks mDNS itself. It submits register/browse requests to a
//! [`Resolver`], receives a [`ResolverSession`] per request, and pumps that session:
//! wait until it is readable, then ask it to process one pending result.

use crate::error::codes;
use async_trait::async_trait;
use std::{collections::HashMap, fmt, io, net::IpAddr};

pub mod mdns;

pub use mdns::MdnsSdResolver;

/// Request to advertise a service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Requested instance name
    pub name: String,
    /// `_<name>._<protocol>` registration type
    pub regtype: String,
    /// Subtypes to advertise alongside the registration type
    pub subtypes: Vec<String>,
    /// Registration domain; empty lets the resolver pick its default
    pub domain: String,
    /// Port the service listens on
    pub port: u16,
    /// TXT record entries
    pub txt: HashMap<String, String>,
}

/// Request to browse for instances of a registration type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseRequest {
    /// `_<name>._<protocol>` registration type
    pub regtype: String,
    /// Restrict the browse to these subtypes (first one wins)
    pub subtypes: Vec<String>,
    /// Browse domain; empty lets the resolver pick its default
    pub domain: String,
}

/// Instance details produced by a resolve step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    /// Instance name
    pub name: String,
    /// Registration type the instance was found under
    pub regtype: String,
    /// Domain the instance lives in
    pub domain: String,
    /// Target host name
    pub host: String,
    /// Service port
    pub port: u16,
    /// Known addresses of the host
    pub addresses: Vec<IpAddr>,
    /// TXT record entries
    pub txt: HashMap<String, String>,
}

/// One result pulled out of a resolver session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverReply {
    /// Registration completed under `name`
    Registered {
        /// Registered instance name
        name: String,
        /// Registration type
        regtype: String,
        /// Domain
        domain: String,
    },
    /// Registration hit a name already in use
    NameConflict {
        /// Conflicting instance name
        name: String,
        /// Registration type
        regtype: String,
        /// Domain
        domain: String,
    },
    /// Browse found an instance; nothing beyond the name is known yet
    ServiceFound {
        /// Instance name
        name: String,
        /// Registration type
        regtype: String,
        /// Domain
        domain: String,
    },
    /// Browse resolved an instance
    ServiceResolved(ResolvedService),
    /// Browse saw an instance go away
    ServiceLost {
        /// Instance name
        name: String,
        /// Registration type
        regtype: String,
        /// Domain
        domain: String,
    },
    /// The resolver reported a non-fatal error for this session
    Failed {
        /// Resolver status code
        code: i32,
        /// Resolver message
        message: String,
    },
}

/// Error raised by the resolver when submitting or processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverError {
    /// Resolver status code (see [`codes`])
    pub code: i32,
    /// Human readable message
    pub message: String,
}

impl ResolverError {
    /// Create a new resolver error
    pub fn new<S: Into<String>>(code: i32, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a new error with the generic failure code
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(codes::UNKNOWN, message)
    }
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ResolverError {}

impl From<mdns_sd::Error> for ResolverError {
    fn from(err: mdns_sd::Error) -> Self {
        Self::unknown(err.to_string())
    }
}

/// Submits requests to an mDNS implementation
#[cfg_attr(test, mockall::automock)]
pub trait Resolver: Send + Sync {
    /// Submit a service registration
    fn register(&self, request: RegisterRequest) -> Result<Box<dyn ResolverSession>, ResolverError>;

    /// Submit a browse
    fn browse(&self, request: BrowseRequest) -> Result<Box<dyn ResolverSession>, ResolverError>;
}

/// A live register or browse session
#[async_trait]
pub trait ResolverSession: Send {
    /// Wait until a result is pending.
    ///
    /// Must be cancel safe: dropping the future before it completes loses nothing.
    /// An error of kind [`io::ErrorKind::Interrupted`] is transient.
    async fn readable(&mut self) -> io::Result<()>;

    /// Process one pending result.
    ///
    /// `Ok(None)` means the result was bookkeeping with nothing to report. Only call
    /// after [`readable`](Self::readable) returned `Ok`.
    fn process_result(&mut self) -> Result<Option<ResolverReply>, ResolverError>;

    /// Release the session and everything it owns
    fn close(self: Box<Self>);
}
