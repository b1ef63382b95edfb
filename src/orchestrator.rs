//! Starting advertise and discover operations
//!
//! Both entry points are non-blocking: they build the request, submit it to the
//! resolver, park a worker for the session on the returned handle. The worker runs
//! once [`OperationHandle::start`] is called, so the caller always holds the handle
//! before the first callback. Everything after submission reaches the caller through
//! the callback.

use crate::{
    config::EngineConfig,
    error::{ErrorCode, MdnsError, Result, codes},
    event_loop::EventLoop,
    operation::{Callback, OperationHandle, OperationKind, ServiceFilter},
    resolver::{
        BrowseRequest, MdnsSdResolver, RegisterRequest, ResolvedService, Resolver, ResolverReply,
        ResolverSession,
    },
    service::{ServiceDescription, ServiceQuery},
    types::{DiscoveryMode, ServiceStatus, ServiceType},
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Starts operations against a resolver and runs one worker per live operation
pub struct ServiceOrchestrator {
    resolver: Arc<dyn Resolver>,
    config: EngineConfig,
    runtime: Handle,
}

impl ServiceOrchestrator {
    /// Create a new orchestrator on the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no runtime is running
    pub fn new(resolver: Arc<dyn Resolver>, config: EngineConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| MdnsError::configuration(format!("No tokio runtime available: {e}")))?;
        Self::with_runtime(resolver, config, runtime)
    }

    /// Create a new orchestrator spawning workers on `runtime`
    pub fn with_runtime(resolver: Arc<dyn Resolver>, config: EngineConfig, runtime: Handle) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            resolver,
            config,
            runtime,
        })
    }

    /// Create a new orchestrator backed by the `mdns-sd` daemon
    pub fn mdns(config: EngineConfig) -> Result<Self> {
        let resolver = Arc::new(MdnsSdResolver::from_config(&config));
        Self::new(resolver, config)
    }

    /// Get the configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Advertise `description` on the network.
    ///
    /// On success the request is submitted and the returned handle is
    /// [`Submitted`](crate::operation::OperationState::Submitted); call
    /// [`OperationHandle::start`] to let events flow. The callback then receives
    /// `NoError` once the name is registered and `NameConflict` if it is taken. If the
    /// request cannot be submitted the callback is invoked exactly once, before this
    /// returns, and the error is returned.
    pub fn advertise<F>(&self, description: &ServiceDescription, callback: F) -> Result<OperationHandle>
    where
        F: Fn(&OperationHandle, ErrorCode, Option<&ServiceDescription>) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let handle = OperationHandle::new(OperationKind::Advertise, description.service_name.clone());

        let request = match self.register_request(description) {
            Ok(request) => request,
            Err(e) => return Err(fail_inline(&handle, &callback, e)),
        };
        info!(
            "Advertising {} as {} on port {}",
            request.name, request.regtype, request.port
        );

        let session = match self.resolver.register(request) {
            Ok(session) => session,
            Err(e) => {
                let err = MdnsError::submission_failed(
                    e.code,
                    format!("Service registration call failed: {}", e.message),
                );
                return Err(fail_inline(&handle, &callback, err));
            }
        };

        let on_reply = reg_reply(callback.clone());
        self.park(session, &handle, callback, on_reply);
        Ok(handle)
    }

    /// Browse for services matching `query`.
    ///
    /// As with [`advertise`](Self::advertise), nothing is delivered until the handle
    /// is started. The callback then receives `NoError` with a description for every
    /// service found or lost (lost services carry [`ServiceStatus::Removed`]).
    pub fn discover<F>(&self, query: &ServiceQuery, callback: F) -> Result<OperationHandle>
    where
        F: Fn(&OperationHandle, ErrorCode, Option<&ServiceDescription>) + Send + Sync + 'static,
    {
        self.start_browse(query, None, Arc::new(callback))
    }

    /// Browse for services matching `query`, delivering only those accepted by `filter`
    pub fn discover_filtered<P, F>(&self, query: &ServiceQuery, filter: P, callback: F) -> Result<OperationHandle>
    where
        P: Fn(&ServiceDescription) -> bool + Send + Sync + 'static,
        F: Fn(&OperationHandle, ErrorCode, Option<&ServiceDescription>) + Send + Sync + 'static,
    {
        self.start_browse(query, Some(Arc::new(filter)), Arc::new(callback))
    }

    fn start_browse(
        &self,
        query: &ServiceQuery,
        filter: Option<ServiceFilter>,
        callback: Callback,
    ) -> Result<OperationHandle> {
        let handle = OperationHandle::new(OperationKind::Discover, query.service_type.to_string());

        let request = match query.service_type.registration_type() {
            Ok(regtype) => BrowseRequest {
                regtype,
                subtypes: query.service_type.subtypes.clone(),
                domain: self.config.domain().to_string(),
            },
            Err(e) => return Err(fail_inline(&handle, &callback, e)),
        };
        info!("Discovering services of type {}", request.regtype);

        let session = match self.resolver.browse(request) {
            Ok(session) => session,
            Err(e) => {
                let err = MdnsError::submission_failed(
                    e.code,
                    format!("Service browse call failed: {}", e.message),
                );
                return Err(fail_inline(&handle, &callback, err));
            }
        };

        let on_reply = query_reply(
            callback.clone(),
            filter,
            self.config.discovery_mode(),
            query.service_type.clone(),
        );
        self.park(session, &handle, callback, on_reply);
        Ok(handle)
    }

    fn register_request(&self, description: &ServiceDescription) -> Result<RegisterRequest> {
        if description.service_name.is_empty() {
            return Err(MdnsError::submission_failed(
                codes::BAD_PARAM,
                "Service name cannot be empty",
            ));
        }
        Ok(RegisterRequest {
            name: description.service_name.clone(),
            regtype: description.service_type.registration_type()?,
            subtypes: description.service_type.subtypes.clone(),
            domain: self.config.domain().to_string(),
            port: description.port,
            txt: description.txt_properties()?,
        })
    }

    /// Park the worker on the handle; [`OperationHandle::start`] spawns it on the runtime
    fn park<H>(
        &self,
        session: Box<dyn ResolverSession>,
        handle: &OperationHandle,
        callback: Callback,
        on_reply: H,
    ) where
        H: FnMut(&OperationHandle, ResolverReply) + Send + 'static,
    {
        let event_loop = EventLoop::new(session, callback, on_reply, self.config.wait_timeout());
        let runtime = self.runtime.clone();
        handle.park(Box::new(move |handle: OperationHandle| {
            debug!("Spawning worker for {} operation {}", handle.kind(), handle.id());
            runtime.spawn(event_loop.run(handle));
        }));
    }
}

/// Report a failure that happened before any worker existed
fn fail_inline(handle: &OperationHandle, callback: &Callback, err: MdnsError) -> MdnsError {
    handle.record_error(&err.to_string());
    handle.mark_terminated();
    callback(handle, err.code(), None);
    err
}

/// Completion handler for registrations
fn reg_reply(callback: Callback) -> impl FnMut(&OperationHandle, ResolverReply) + Send + 'static {
    move |handle: &OperationHandle, reply| match reply {
        ResolverReply::Registered { name, regtype, domain } => {
            info!("Registered {}.{}.{}", name, regtype, domain);
            callback(handle, ErrorCode::NoError, None);
        }
        ResolverReply::NameConflict { name, regtype, domain } => {
            let message = format!("Name in use, please choose another {name}.{regtype}.{domain}");
            handle.record_error(&message);
            callback(handle, ErrorCode::NameConflict, None);
        }
        ResolverReply::Failed { code, message } => {
            handle.record_error(&format!("mDNS unexpected error: {message}"));
            callback(handle, ErrorCode::SessionError(code), None);
        }
        other => debug!("Registration {} ignoring reply {:?}", handle.id(), other),
    }
}

/// Completion handler for browses
fn query_reply(
    callback: Callback,
    filter: Option<ServiceFilter>,
    mode: DiscoveryMode,
    service_type: ServiceType,
) -> impl FnMut(&OperationHandle, ResolverReply) + Send + 'static {
    move |handle: &OperationHandle, reply| {
        let description = match reply {
            ResolverReply::ServiceFound { name, .. } if mode == DiscoveryMode::NameOnly => {
                ServiceDescription::new(name, service_type.clone(), 0)
                    .with_status(ServiceStatus::Discovered)
            }
            ResolverReply::ServiceResolved(resolved) if mode == DiscoveryMode::Resolve => {
                resolved_description(resolved, &service_type)
            }
            ResolverReply::ServiceLost { name, .. } => {
                ServiceDescription::new(name, service_type.clone(), 0)
                    .with_status(ServiceStatus::Removed)
            }
            ResolverReply::Failed { code, message } => {
                handle.record_error(&format!("mDNS unexpected error: {message}"));
                callback(handle, ErrorCode::SessionError(code), None);
                return;
            }
            other => {
                debug!("Discovery {} skipping reply {:?}", handle.id(), other);
                return;
            }
        };

        if filter.as_ref().is_some_and(|accept| !accept(&description)) {
            debug!("Discovery {} filtered out {}", handle.id(), description.service_name);
            return;
        }
        debug!("Discovery {} delivering {}", handle.id(), description);
        callback(handle, ErrorCode::NoError, Some(&description));
    }
}

fn resolved_description(resolved: ResolvedService, service_type: &ServiceType) -> ServiceDescription {
    let properties: Map<String, Value> = resolved
        .txt
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    let mut addresses = resolved.addresses;
    addresses.sort();

    let mut description = ServiceDescription::new(resolved.name, service_type.clone(), resolved.port)
        .with_properties(&properties)
        .with_status(ServiceStatus::Discovered);
    description.host = Some(resolved.host);
    description.addresses = addresses;
    description
}
