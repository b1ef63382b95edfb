use async_trait::async_trait;
use mdns_lifecycle::{
    config::EngineConfig,
    error::{ErrorCode, codes},
    operation::{OperationHandle, OperationState},
    orchestrator::ServiceOrchestrator,
    resolver::{
        BrowseRequest, RegisterRequest, ResolvedService, Resolver, ResolverError, ResolverReply,
        ResolverSession,
    },
    service::{ServiceDescription, ServiceQuery},
    types::{DiscoveryMode, ServiceStatus, ServiceType},
};
use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{sync::mpsc, time::timeout};

type Feed = mpsc::UnboundedSender<Result<Option<ResolverReply>, ResolverError>>;

/// Session whose results are pushed by the test through a channel
struct ChannelSession {
    rx: mpsc::UnboundedReceiver<Result<Option<ResolverReply>, ResolverError>>,
    pending: Option<Result<Option<ResolverReply>, ResolverError>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ResolverSession for ChannelSession {
    async fn readable(&mut self) -> io::Result<()> {
        if self.pending.is_some() {
            return Ok(());
        }
        match self.rx.recv().await {
            Some(result) => {
                self.pending = Some(result);
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "feed closed")),
        }
    }

    fn process_result(&mut self) -> Result<Option<ResolverReply>, ResolverError> {
        self.pending.take().unwrap_or(Ok(None))
    }

    fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resolver handing out channel sessions and keeping the feeding ends
#[derive(Default)]
struct FakeResolver {
    feeds: Mutex<Vec<Feed>>,
    registers: Mutex<Vec<RegisterRequest>>,
    browses: Mutex<Vec<BrowseRequest>>,
    closed: Arc<AtomicUsize>,
    reject: Option<i32>,
}

impl FakeResolver {
    fn session(&self) -> Result<Box<dyn ResolverSession>, ResolverError> {
        if let Some(code) = self.reject {
            return Err(ResolverError::new(code, "rejected"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().push(tx);
        Ok(Box::new(ChannelSession {
            rx,
            pending: None,
            closed: self.closed.clone(),
        }))
    }

    fn feed(&self, index: usize) -> Feed {
        self.feeds.lock().unwrap()[index].clone()
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Resolver for FakeResolver {
    fn register(&self, request: RegisterRequest) -> Result<Box<dyn ResolverSession>, ResolverError> {
        self.registers.lock().unwrap().push(request);
        self.session()
    }

    fn browse(&self, request: BrowseRequest) -> Result<Box<dyn ResolverSession>, ResolverError> {
        self.browses.lock().unwrap().push(request);
        self.session()
    }
}

type Events = mpsc::UnboundedReceiver<(ErrorCode, Option<ServiceDescription>)>;

fn collector() -> (
    Events,
    impl Fn(&OperationHandle, ErrorCode, Option<&ServiceDescription>) + Send + Sync + 'static,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |_: &OperationHandle, code: ErrorCode, desc: Option<&ServiceDescription>| {
        let _ = tx.send((code, desc.cloned()));
    };
    (rx, callback)
}

async fn next(events: &mut Events) -> (ErrorCode, Option<ServiceDescription>) {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

fn temp1() -> ServiceDescription {
    ServiceDescription::new("Temp1", ServiceType::new("temp", "tcp"), 8080)
}

fn names(name: &str) -> (String, String, String) {
    (name.to_string(), "_temp._tcp".to_string(), "local.".to_string())
}

fn registered(name: &str) -> ResolverReply {
    let (name, regtype, domain) = names(name);
    ResolverReply::Registered { name, regtype, domain }
}

fn found(name: &str) -> ResolverReply {
    let (name, regtype, domain) = names(name);
    ResolverReply::ServiceFound { name, regtype, domain }
}

fn lost(name: &str) -> ResolverReply {
    let (name, regtype, domain) = names(name);
    ResolverReply::ServiceLost { name, regtype, domain }
}

fn resolved(name: &str, port: u16) -> ResolverReply {
    ResolverReply::ServiceResolved(ResolvedService {
        name: name.to_string(),
        regtype: "_temp._tcp".to_string(),
        domain: "local.".to_string(),
        host: format!("{name}.local."),
        port,
        addresses: vec!["10.0.0.7".parse().unwrap()],
        txt: Default::default(),
    })
}

#[tokio::test]
async fn test_advertise_returns_before_events() {
    let resolver = Arc::new(FakeResolver::default());
    let orchestrator = ServiceOrchestrator::new(resolver.clone(), EngineConfig::new()).unwrap();

    let (mut events, callback) = collector();
    let handle = orchestrator.advertise(&temp1(), callback).unwrap();
    assert!(handle.start());

    // Nothing has been fed yet, so nothing may have been delivered
    assert!(events.try_recv().is_err());
    assert_eq!(resolver.registers.lock().unwrap()[0].regtype, "_temp._tcp");

    resolver.feed(0).send(Ok(Some(registered("Temp1")))).unwrap();
    assert_eq!(next(&mut events).await, (ErrorCode::NoError, None));
    assert!(matches!(
        handle.state(),
        OperationState::Submitted | OperationState::Running
    ));

    handle.cancel();
    timeout(Duration::from_secs(2), handle.terminated()).await.unwrap();
    assert_eq!(handle.state(), OperationState::Terminated);
    assert_eq!(resolver.closed(), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_name_conflict_reaches_callback() {
    let resolver = Arc::new(FakeResolver::default());
    let orchestrator = ServiceOrchestrator::new(resolver.clone(), EngineConfig::new()).unwrap();

    let (mut first_events, first_cb) = collector();
    let (mut second_events, second_cb) = collector();
    let first = orchestrator.advertise(&temp1(), first_cb).unwrap();
    let second = orchestrator.advertise(&temp1(), second_cb).unwrap();
    assert!(first.start());
    assert!(second.start());

    resolver.feed(0).send(Ok(Some(registered("Temp1")))).unwrap();
    let (name, regtype, domain) = names("Temp1");
    resolver
        .feed(1)
        .send(Ok(Some(ResolverReply::NameConflict { name, regtype, domain })))
        .unwrap();

    assert_eq!(next(&mut first_events).await.0, ErrorCode::NoError);
    assert_eq!(next(&mut second_events).await.0, ErrorCode::NameConflict);
    assert!(second.last_error().unwrap().starts_with("Name in use"));
    assert_eq!(first.last_error(), None);

    first.cancel();
    second.cancel();
    first.terminated().await;
    second.terminated().await;
    assert_eq!(resolver.closed(), 2);
}

#[tokio::test]
async fn test_fatal_session_error_is_terminal() {
    let resolver = Arc::new(FakeResolver::default());
    let orchestrator = ServiceOrchestrator::new(resolver.clone(), EngineConfig::new()).unwrap();

    let (mut events, callback) = collector();
    let handle = orchestrator.advertise(&temp1(), callback).unwrap();
    assert!(handle.start());

    let feed = resolver.feed(0);
    feed.send(Err(ResolverError::new(codes::SERVICE_NOT_RUNNING, "daemon stopped")))
        .unwrap();
    // Never processed: the worker is gone
    feed.send(Ok(Some(registered("Temp1")))).ok();

    assert_eq!(
        next(&mut events).await,
        (ErrorCode::SessionError(codes::SERVICE_NOT_RUNNING), None)
    );
    timeout(Duration::from_secs(2), handle.terminated()).await.unwrap();
    assert!(events.try_recv().is_err());
    assert_eq!(resolver.closed(), 1);
    assert!(handle.last_error().unwrap().contains("daemon stopped"));
}

#[tokio::test]
async fn test_submission_failure_is_synchronous() {
    let resolver = Arc::new(FakeResolver {
        reject: Some(codes::SERVICE_NOT_RUNNING),
        ..Default::default()
    });
    let orchestrator = ServiceOrchestrator::new(resolver.clone(), EngineConfig::new()).unwrap();

    let (mut events, callback) = collector();
    let result = orchestrator.discover(&ServiceQuery::from(&temp1()), callback);

    assert!(result.is_err());
    assert_eq!(
        events.try_recv().unwrap(),
        (ErrorCode::SubmissionFailed(codes::SERVICE_NOT_RUNNING), None)
    );
    assert!(events.try_recv().is_err());
    assert!(!mdns_lifecycle::last_error().is_empty());
}

#[tokio::test]
async fn test_discover_resolve_mode() {
    let resolver = Arc::new(FakeResolver::default());
    let orchestrator = ServiceOrchestrator::new(resolver.clone(), EngineConfig::new()).unwrap();

    let (mut events, callback) = collector();
    let handle = orchestrator
        .discover(&ServiceQuery::new(ServiceType::new("temp", "tcp")), callback)
        .unwrap();
    assert!(handle.start());
    assert_eq!(resolver.browses.lock().unwrap()[0].regtype, "_temp._tcp");

    let feed = resolver.feed(0);
    feed.send(Ok(Some(found("Temp1")))).unwrap();
    feed.send(Ok(None)).unwrap();
    feed.send(Ok(Some(resolved("Temp1", 8080)))).unwrap();
    feed.send(Ok(Some(lost("Temp1")))).unwrap();

    let (code, desc) = next(&mut events).await;
    assert_eq!(code, ErrorCode::NoError);
    let desc = desc.unwrap();
    assert_eq!(desc.service_name, "Temp1");
    assert_eq!(desc.port, 8080);
    assert_eq!(desc.status, ServiceStatus::Discovered);
    assert_eq!(desc.host.as_deref(), Some("Temp1.local."));

    let (code, desc) = next(&mut events).await;
    assert_eq!(code, ErrorCode::NoError);
    assert_eq!(desc.unwrap().status, ServiceStatus::Removed);

    handle.cancel();
    handle.terminated().await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_discover_name_only_with_filter() {
    let resolver = Arc::new(FakeResolver::default());
    let config = EngineConfig::new().with_discovery_mode(DiscoveryMode::NameOnly);
    let orchestrator = ServiceOrchestrator::new(resolver.clone(), config).unwrap();

    let (mut events, callback) = collector();
    let handle = orchestrator
        .discover_filtered(
            &ServiceQuery::new(ServiceType::new("temp", "tcp")),
            |d: &ServiceDescription| d.service_name.starts_with("Temp"),
            callback,
        )
        .unwrap();
    assert!(handle.start());

    let feed = resolver.feed(0);
    feed.send(Ok(Some(found("Humidity1")))).unwrap();
    feed.send(Ok(Some(resolved("Temp2", 9000)))).unwrap();
    feed.send(Ok(Some(found("Temp2")))).unwrap();

    let (code, desc) = next(&mut events).await;
    assert_eq!(code, ErrorCode::NoError);
    let desc = desc.unwrap();
    assert_eq!(desc.service_name, "Temp2");
    assert_eq!(desc.port, 0);
    assert_eq!(desc.host, None);

    handle.cancel();
    handle.terminated().await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_lost_resolver_ends_operation() {
    let resolver = Arc::new(FakeResolver::default());
    let orchestrator = ServiceOrchestrator::new(resolver.clone(), EngineConfig::new()).unwrap();

    let (mut events, callback) = collector();
    let handle = orchestrator
        .discover(&ServiceQuery::new(ServiceType::new("temp", "tcp")), callback)
        .unwrap();
    assert!(handle.start());

    // Dropping every sender makes the readiness wait fail
    resolver.feeds.lock().unwrap().clear();

    assert_eq!(next(&mut events).await, (ErrorCode::WaitFailed(-1), None));
    timeout(Duration::from_secs(2), handle.terminated()).await.unwrap();
    assert_eq!(resolver.closed(), 1);
}

#[tokio::test]
async fn test_operations_are_independent() {
    let resolver = Arc::new(FakeResolver::default());
    let orchestrator = ServiceOrchestrator::new(resolver.clone(), EngineConfig::new()).unwrap();

    let (mut advert_events, advert_cb) = collector();
    let (mut browse_events, browse_cb) = collector();
    let advert = orchestrator.advertise(&temp1(), advert_cb).unwrap();
    let browse = orchestrator
        .discover(&ServiceQuery::from(&temp1()), browse_cb)
        .unwrap();
    assert!(advert.start());
    assert!(browse.start());

    browse.cancel();
    browse.terminated().await;
    assert!(!advert.is_terminated());

    resolver.feed(0).send(Ok(Some(registered("Temp1")))).unwrap();
    assert_eq!(next(&mut advert_events).await.0, ErrorCode::NoError);
    assert!(browse_events.try_recv().is_err());

    advert.cancel();
    advert.terminated().await;
    assert_eq!(resolver.closed(), 2);
}

/// Resolver whose sessions report a registration as soon as they are polled
struct EagerResolver;

struct EagerSession {
    pending: Option<ResolverReply>,
}

#[async_trait]
impl ResolverSession for EagerSession {
    async fn readable(&mut self) -> io::Result<()> {
        if self.pending.is_none() {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn process_result(&mut self) -> Result<Option<ResolverReply>, ResolverError> {
        Ok(self.pending.take())
    }

    fn close(self: Box<Self>) {}
}

impl Resolver for EagerResolver {
    fn register(&self, request: RegisterRequest) -> Result<Box<dyn ResolverSession>, ResolverError> {
        Ok(Box::new(EagerSession {
            pending: Some(registered(&request.name)),
        }))
    }

    fn browse(&self, _: BrowseRequest) -> Result<Box<dyn ResolverSession>, ResolverError> {
        Err(ResolverError::unknown("browse unsupported"))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handle_held_before_first_callback_on_multi_thread_runtime() {
    let orchestrator = ServiceOrchestrator::new(Arc::new(EagerResolver), EngineConfig::new()).unwrap();
    let early = Arc::new(AtomicUsize::new(0));
    let delivered = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for _ in 0..500 {
        let stored = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let (early, delivered, seen_stored) = (early.clone(), delivered.clone(), stored.clone());
        let callback = move |_: &OperationHandle, _: ErrorCode, _: Option<&ServiceDescription>| {
            if !seen_stored.load(Ordering::SeqCst) {
                early.fetch_add(1, Ordering::SeqCst);
            }
            delivered.fetch_add(1, Ordering::SeqCst);
        };

        let handle = orchestrator.advertise(&temp1(), callback).unwrap();
        // Give workers every chance to run before the caller has stored the handle
        std::thread::yield_now();
        stored.store(true, Ordering::SeqCst);
        assert!(handle.start());
        handles.push(handle);
    }

    timeout(Duration::from_secs(5), async {
        while delivered.load(Ordering::SeqCst) < 500 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("not every registration was delivered");
    assert_eq!(early.load(Ordering::SeqCst), 0);

    for handle in &handles {
        handle.cancel();
    }
    for handle in &handles {
        handle.terminated().await;
    }
}
