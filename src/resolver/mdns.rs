//! Resolver backed by the `mdns-sd` daemon
//!
//! Each session owns its own [`ServiceDaemon`], so closing a session shuts down exactly
//! the sockets and thread that were opened for it.

use super::{
    BrowseRequest, RegisterRequest, ResolvedService, Resolver, ResolverError, ResolverReply,
    ResolverSession,
};
use crate::{config::EngineConfig, error::codes};
use async_trait::async_trait;
use flume::Receiver;
use mdns_sd::{DaemonEvent, ServiceDaemon, ServiceEvent, ServiceInfo as MdnsServiceInfo};
use std::{fmt, io, net::IpAddr, thread, time::Duration};
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    task,
};
use tracing::{debug, warn};

const DEFAULT_DOMAIN: &str = "local.";

/// Production resolver talking multicast DNS through `mdns-sd`
#[derive(Debug, Clone)]
pub struct MdnsSdResolver {
    daemon_retries: u32,
    daemon_retry_delay: Duration,
}

impl Default for MdnsSdResolver {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl MdnsSdResolver {
    /// Create a new resolver with default retry settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new resolver using the daemon settings of `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            daemon_retries: config.daemon_retries().max(1),
            daemon_retry_delay: config.daemon_retry_delay(),
        }
    }

    /// Create a daemon, retrying with increasing delays
    fn create_daemon(&self) -> Result<ServiceDaemon, ResolverError> {
        with_retries(self.daemon_retries, self.daemon_retry_delay, ServiceDaemon::new).map_err(
            |(attempts, e)| {
                ResolverError::new(
                    codes::SERVICE_NOT_RUNNING,
                    format!("Failed to create mDNS daemon after {attempts} attempts: {e}"),
                )
            },
        )
    }
}

/// Run `op` up to `attempts` times, pausing `delay * attempt` between failures.
///
/// On error returns the number of attempts made and the last error.
fn with_retries<T, E, F>(attempts: u32, delay: Duration, mut op: F) -> Result<T, (u32, E)>
where
    E: fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("Failed to create mDNS daemon (attempt {}): {}", attempt, e);
                retry_pause(delay * attempt);
                attempt += 1;
            }
            Err(e) => return Err((attempt, e)),
        }
    }
}

/// Pause between daemon creation attempts without stalling the async runtime.
///
/// A multi-thread runtime worker hands its tasks off for the pause; a current-thread
/// runtime cannot, so the retry follows immediately there.
fn retry_pause(delay: Duration) {
    match Handle::try_current().map(|runtime| runtime.runtime_flavor()) {
        Err(_) => thread::sleep(delay),
        Ok(RuntimeFlavor::MultiThread) => task::block_in_place(|| thread::sleep(delay)),
        Ok(_) => debug!("Retrying immediately on a current-thread runtime"),
    }
}

impl Resolver for MdnsSdResolver {
    fn register(&self, request: RegisterRequest) -> Result<Box<dyn ResolverSession>, ResolverError> {
        let domain = normalize_domain(&request.domain);
        let ty_domain = type_domain(&request.regtype, request.subtypes.first(), &domain);
        let hostname = format!("{}.{domain}", host_label(&request.name));

        // Addresses are filled in by the daemon from its interfaces
        let no_addrs: [IpAddr; 0] = [];
        let info = MdnsServiceInfo::new(
            &ty_domain,
            &request.name,
            &hostname,
            &no_addrs[..],
            request.port,
            request.txt.clone(),
        )
        .map_err(|e| {
            ResolverError::new(codes::BAD_PARAM, format!("Failed to create mDNS service info: {e}"))
        })?
        .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        let daemon = self.create_daemon()?;
        let submitted = daemon
            .monitor()
            .and_then(|events| daemon.register(info).map(|()| events));
        let events = match submitted {
            Ok(events) => events,
            Err(e) => {
                shutdown_daemon(&daemon);
                return Err(ResolverError::unknown(format!(
                    "Failed to register service '{fullname}': {e}"
                )));
            }
        };

        debug!("Submitted mDNS registration for {}", fullname);
        Ok(Box::new(RegisterSession {
            daemon,
            events,
            pending: None,
            registration: Registration {
                fullname,
                hostname,
                name: request.name,
                regtype: request.regtype,
                domain,
                registered: false,
            },
        }))
    }

    fn browse(&self, request: BrowseRequest) -> Result<Box<dyn ResolverSession>, ResolverError> {
        let domain = normalize_domain(&request.domain);
        let ty_domain = type_domain(&request.regtype, request.subtypes.first(), &domain);

        let daemon = self.create_daemon()?;
        let events = match daemon.browse(&ty_domain) {
            Ok(events) => events,
            Err(e) => {
                shutdown_daemon(&daemon);
                return Err(ResolverError::unknown(format!(
                    "Failed to browse services of type '{ty_domain}': {e}"
                )));
            }
        };

        debug!("Submitted mDNS browse for {}", ty_domain);
        Ok(Box::new(BrowseSession {
            daemon,
            events,
            pending: None,
            ty_domain,
            browse: Browse::new(request.regtype, domain),
        }))
    }
}

/// What a registration has seen of its own name
#[derive(Debug)]
struct Registration {
    fullname: String,
    hostname: String,
    name: String,
    regtype: String,
    domain: String,
    registered: bool,
}

impl Registration {
    /// Turn a daemon monitor event into a reply; events about other names yield `None`
    fn map_daemon_event(&mut self, event: DaemonEvent) -> Option<ResolverReply> {
        match event {
            DaemonEvent::Announce(fullname, addresses) if fullname == self.fullname => {
                debug!("Announced {} on {}", fullname, addresses);
                if self.registered {
                    None
                } else {
                    self.registered = true;
                    Some(ResolverReply::Registered {
                        name: self.name.clone(),
                        regtype: self.regtype.clone(),
                        domain: self.domain.clone(),
                    })
                }
            }
            DaemonEvent::NameChange(change) => {
                debug!("Name change: {} renamed to {}", change.original, change.new_name);
                self.on_rename(&change.original)
            }
            DaemonEvent::Error(e) => Some(ResolverReply::Failed {
                code: codes::UNKNOWN,
                message: e.to_string(),
            }),
            _ => None,
        }
    }

    /// The daemon renamed `original` because another host already owns it
    fn on_rename(&self, original: &str) -> Option<ResolverReply> {
        (original == self.fullname || original == self.hostname).then(|| {
            ResolverReply::NameConflict {
                name: self.name.clone(),
                regtype: self.regtype.clone(),
                domain: self.domain.clone(),
            }
        })
    }
}

struct RegisterSession {
    daemon: ServiceDaemon,
    events: Receiver<DaemonEvent>,
    pending: Option<DaemonEvent>,
    registration: Registration,
}

#[async_trait]
impl ResolverSession for RegisterSession {
    async fn readable(&mut self) -> io::Result<()> {
        if self.pending.is_none() {
            self.pending = Some(self.events.recv_async().await.map_err(|_| closed_channel())?);
        }
        Ok(())
    }

    fn process_result(&mut self) -> Result<Option<ResolverReply>, ResolverError> {
        Ok(self
            .pending
            .take()
            .and_then(|event| self.registration.map_daemon_event(event)))
    }

    fn close(self: Box<Self>) {
        let fullname = &self.registration.fullname;
        if let Err(e) = self.daemon.unregister(fullname) {
            debug!("Unregister of {} failed: {}", fullname, e);
        }
        shutdown_daemon(&self.daemon);
    }
}

/// Maps browse events of one registration type to replies
#[derive(Debug)]
struct Browse {
    suffix: String,
    regtype: String,
    domain: String,
}

impl Browse {
    fn new(regtype: String, domain: String) -> Self {
        Self {
            suffix: format!(".{regtype}.{domain}"),
            regtype,
            domain,
        }
    }

    fn instance_name(&self, fullname: &str) -> String {
        fullname
            .strip_suffix(&self.suffix)
            .unwrap_or_else(|| fullname.trim_end_matches('.'))
            .to_string()
    }

    fn map_service_event(&self, event: ServiceEvent) -> Result<Option<ResolverReply>, ResolverError> {
        match event {
            ServiceEvent::ServiceFound(_, fullname) => Ok(Some(ResolverReply::ServiceFound {
                name: self.instance_name(&fullname),
                regtype: self.regtype.clone(),
                domain: self.domain.clone(),
            })),
            ServiceEvent::ServiceResolved(info) => {
                Ok(Some(ResolverReply::ServiceResolved(ResolvedService {
                    name: self.instance_name(info.get_fullname()),
                    regtype: self.regtype.clone(),
                    domain: self.domain.clone(),
                    host: info.get_hostname().to_string(),
                    port: info.get_port(),
                    addresses: info.get_addresses().iter().copied().collect(),
                    txt: info
                        .get_properties()
                        .iter()
                        .map(|p| (p.key().to_string(), p.val_str().to_string()))
                        .collect(),
                })))
            }
            ServiceEvent::ServiceRemoved(_, fullname) => Ok(Some(ResolverReply::ServiceLost {
                name: self.instance_name(&fullname),
                regtype: self.regtype.clone(),
                domain: self.domain.clone(),
            })),
            ServiceEvent::SearchStopped(ty_domain) => Err(ResolverError::new(
                codes::SERVICE_NOT_RUNNING,
                format!("Browse for {ty_domain} stopped"),
            )),
            _ => Ok(None),
        }
    }
}

struct BrowseSession {
    daemon: ServiceDaemon,
    events: Receiver<ServiceEvent>,
    pending: Option<ServiceEvent>,
    ty_domain: String,
    browse: Browse,
}

#[async_trait]
impl ResolverSession for BrowseSession {
    async fn readable(&mut self) -> io::Result<()> {
        if self.pending.is_none() {
            self.pending = Some(self.events.recv_async().await.map_err(|_| closed_channel())?);
        }
        Ok(())
    }

    fn process_result(&mut self) -> Result<Option<ResolverReply>, ResolverError> {
        match self.pending.take() {
            Some(event) => self.browse.map_service_event(event),
            None => Ok(None),
        }
    }

    fn close(self: Box<Self>) {
        if let Err(e) = self.daemon.stop_browse(&self.ty_domain) {
            debug!("Stop browse of {} failed: {}", self.ty_domain, e);
        }
        shutdown_daemon(&self.daemon);
    }
}

fn shutdown_daemon(daemon: &ServiceDaemon) {
    if let Err(e) = daemon.shutdown() {
        debug!("mDNS daemon shutdown failed: {}", e);
    }
}

fn closed_channel() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "mDNS daemon event channel closed")
}

fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim_matches('.');
    if domain.is_empty() {
        DEFAULT_DOMAIN.to_string()
    } else {
        format!("{domain}.")
    }
}

fn type_domain(regtype: &str, subtype: Option<&String>, domain: &str) -> String {
    match subtype {
        Some(sub) => format!("_{sub}._sub.{regtype}.{domain}"),
        None => format!("{regtype}.{domain}"),
    }
}

/// Host label derived from an instance name: alphanumerics and '-' only
fn host_label(name: &str) -> String {
    let label: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let label = label.trim_matches('-');
    if label.is_empty() {
        "mdns-host".to_string()
    } else {
        label.to_string()
    }
}
