//! Dependency query server: localhost HTTP/1.1, read-only queries over the registry's dependency graph.
//! Endpoints: GET /health, GET /dependencies?asset=, GET /referencers?asset=

use serde::Serialize;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::AuditError;
use crate::identity::{strip_object_suffix, AssetIdentity};
use crate::registry::{AssetRegistry, CategoryMask};

mod http;
mod marker;

pub use marker::DiscoveryMarker;

use http::{parse_request, to_json, write_response, Request};
use marker::MarkerGuard;

pub const DEFAULT_PORT_START: u16 = 19900;
pub const DEFAULT_PORT_END: u16 = 19910;
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

// Keep poll sleep small to avoid adding queueing delay to localhost requests.
const ACCEPT_POLL_SLEEP: Duration = Duration::from_millis(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

const AVAILABLE_ROUTES: &str =
    "Not found. Available: GET /health, GET /dependencies?asset=<path>, GET /referencers?asset=<path>";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Inclusive port range, tried in ascending order.
    pub port_start: u16,
    pub port_end: u16,
    /// Where to publish the discovery marker; `None` publishes nothing.
    pub marker_path: Option<PathBuf>,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port_start: DEFAULT_PORT_START,
            port_end: DEFAULT_PORT_END,
            marker_path: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Binding,
    Listening(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Health,
    Query(Direction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Dependencies,
    Referencers,
}

impl Direction {
    fn field(self) -> &'static str {
        match self {
            Direction::Dependencies => "dependencies",
            Direction::Referencers => "referencers",
        }
    }
}

/// Route table. Bound on start, emptied on stop.
#[derive(Default)]
struct Router {
    routes: RwLock<Vec<(&'static str, &'static str, Route)>>,
}

impl Router {
    fn bind(&self, method: &'static str, path: &'static str, route: Route) {
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((method, path, route));
    }

    fn unbind_all(&self) {
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn resolve(&self, method: &str, path: &str) -> Option<Route> {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(m, p, _)| *m == method && *p == path)
            .map(|(_, _, route)| *route)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.routes.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    port: u16,
    pid: u32,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    asset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            asset: None,
            usage: None,
            hint: None,
        }
    }
}

/// State shared with the accept loop and connection threads.
struct Shared {
    registry: Arc<dyn AssetRegistry>,
    router: Arc<Router>,
    port: u16,
}

struct Running {
    port: u16,
    shutdown: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
    _marker: Option<MarkerGuard>,
}

pub struct DependencyQueryServer {
    registry: Arc<dyn AssetRegistry>,
    config: ServerConfig,
    router: Arc<Router>,
    status: Mutex<ServerStatus>,
    running: Mutex<Option<Running>>,
}

impl DependencyQueryServer {
    pub fn new(registry: Arc<dyn AssetRegistry>, config: ServerConfig) -> Self {
        Self {
            registry,
            config,
            router: Arc::new(Router::default()),
            status: Mutex::new(ServerStatus::Stopped),
            running: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ServerStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn port(&self) -> Option<u16> {
        match self.status() {
            ServerStatus::Listening(port) => Some(port),
            _ => None,
        }
    }

    fn set_status(&self, status: ServerStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Bind the first free port in the range, publish the marker and start serving.
    /// Returns false, with nothing bound and no marker written, when every port is taken.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return true;
        }
        self.set_status(ServerStatus::Binding);

        let Some((listener, port)) = self.bind_first_free() else {
            let err = AuditError::PortExhausted {
                start: self.config.port_start,
                end: self.config.port_end,
            };
            tracing::error!(error = %err, "dependency query server not started");
            self.set_status(ServerStatus::Stopped);
            return false;
        };
        if let Err(e) = listener.set_nonblocking(true) {
            tracing::error!(port, error = %e, "failed to set non-blocking mode");
            self.set_status(ServerStatus::Stopped);
            return false;
        }

        self.router.bind("GET", "/health", Route::Health);
        self.router
            .bind("GET", "/dependencies", Route::Query(Direction::Dependencies));
        self.router
            .bind("GET", "/referencers", Route::Query(Direction::Referencers));

        let marker = self.config.marker_path.as_ref().and_then(|path| {
            match MarkerGuard::write(path, &DiscoveryMarker::for_current_process(port)) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to write discovery marker");
                    None
                }
            }
        });

        let shutdown = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            registry: Arc::clone(&self.registry),
            router: Arc::clone(&self.router),
            port,
        });
        let accept = {
            let shutdown = Arc::clone(&shutdown);
            let max_connections = self.config.max_connections.max(1);
            std::thread::Builder::new()
                .name(format!("query-server-{port}"))
                .spawn(move || accept_loop(listener, shared, shutdown, max_connections))
        };
        let accept = match accept {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(port, error = %e, "failed to spawn accept loop");
                self.router.unbind_all();
                self.set_status(ServerStatus::Stopped);
                return false;
            }
        };

        *running = Some(Running {
            port,
            shutdown,
            accept: Some(accept),
            _marker: marker,
        });
        self.set_status(ServerStatus::Listening(port));
        tracing::info!(port, "dependency query server listening on http://127.0.0.1:{port}");
        true
    }

    fn bind_first_free(&self) -> Option<(TcpListener, u16)> {
        (self.config.port_start..=self.config.port_end).find_map(|port| {
            match TcpListener::bind(("127.0.0.1", port)) {
                Ok(listener) => Some((listener, port)),
                Err(e) => {
                    tracing::debug!(port, error = %e, "port unavailable");
                    None
                }
            }
        })
    }

    /// Unbind routes, stop the listener and delete the marker. No-op when not running.
    pub fn stop(&self) {
        let taken = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut running) = taken else {
            return;
        };

        self.router.unbind_all();
        running.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = running.accept.take() {
            let _ = handle.join();
        }
        let port = running.port;
        drop(running);
        self.set_status(ServerStatus::Stopped);
        tracing::info!(port, "dependency query server stopped");
    }
}

impl Drop for DependencyQueryServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
    max_connections: usize,
) {
    let active = Arc::new(AtomicUsize::new(0));
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if active.fetch_add(1, Ordering::SeqCst) >= max_connections {
                    active.fetch_sub(1, Ordering::SeqCst);
                    tracing::warn!(%peer, "connection limit reached, dropping");
                    continue;
                }
                let shared = Arc::clone(&shared);
                let active = Arc::clone(&active);
                std::thread::spawn(move || {
                    handle_connection(stream, &shared);
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_SLEEP);
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept error");
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn handle_connection(stream: TcpStream, shared: &Shared) {
    // accepted sockets inherit non-blocking mode on some platforms
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(READ_TIMEOUT));

    let (status, body) = match parse_request(&stream) {
        Ok(req) => {
            tracing::debug!(method = %req.method, path = %req.path, "request");
            dispatch(&req, shared)
        }
        Err(e) => (400, to_json(&ErrorResponse::new(e.to_string()))),
    };
    if let Err(e) = write_response(&stream, status, &body) {
        tracing::debug!(error = %e, "client went away");
    }
}

fn dispatch(req: &Request, shared: &Shared) -> (u16, String) {
    match shared.router.resolve(&req.method, &req.path) {
        Some(Route::Health) => (
            200,
            to_json(&HealthResponse {
                status: "ok",
                port: shared.port,
                pid: std::process::id(),
            }),
        ),
        Some(Route::Query(direction)) => handle_query(req, direction, shared.registry.as_ref()),
        None => (404, to_json(&ErrorResponse::new(AVAILABLE_ROUTES))),
    }
}

fn handle_query(req: &Request, direction: Direction, registry: &dyn AssetRegistry) -> (u16, String) {
    let raw = req.query.get("asset").map(|v| v.trim()).unwrap_or("");
    let asset = strip_object_suffix(raw);
    if asset.is_empty() {
        let body = ErrorResponse {
            usage: Some(format!("/{}?asset=/Game/Path/To/Asset", direction.field())),
            ..ErrorResponse::new("Missing required 'asset' query parameter")
        };
        return (400, to_json(&body));
    }

    let identity = match AssetIdentity::parse(asset) {
        Ok(id) if registry.resolve_exists(&id) => id,
        _ => {
            let body = ErrorResponse {
                asset: Some(asset.to_string()),
                hint: Some(
                    "Check that the package path is correct and the registry has finished loading"
                        .to_string(),
                ),
                ..ErrorResponse::new("Asset not found in registry")
            };
            return (404, to_json(&body));
        }
    };

    let edges = match direction {
        Direction::Dependencies => registry.dependencies(&identity, CategoryMask::ALL),
        Direction::Referencers => registry.referencers(&identity, CategoryMask::ALL),
    };
    let body = serde_json::json!({
        "asset": identity,
        direction.field(): edges,
    });
    (200, body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetKind, LoadedAsset};
    use crate::registry::{DependencyEdge, MemoryRegistry};
    use std::io::{Read, Write};
    use std::sync::atomic::AtomicU16;
    use tempfile::TempDir;

    fn id(raw: &str) -> AssetIdentity {
        AssetIdentity::parse(raw).unwrap()
    }

    fn registry() -> Arc<MemoryRegistry> {
        let registry = MemoryRegistry::new();
        let mut a = LoadedAsset::new(id("/ns/Foo/Bar"), AssetKind::Blueprint);
        a.dependencies.push(DependencyEdge::hard(id("/ns/Baz")));
        registry.add_asset(a, None).unwrap();
        registry
            .add_asset(LoadedAsset::new(id("/ns/Baz"), AssetKind::Blueprint), None)
            .unwrap();
        Arc::new(registry)
    }

    /// A window of `len` consecutive ports whose first `busy` are held by the returned listeners.
    fn port_window(len: u16, busy: u16) -> (Vec<TcpListener>, u16, u16) {
        // windows never overlap within one test binary
        static NEXT_WINDOW: AtomicU16 = AtomicU16::new(0);
        let origin = 30_000 + (std::process::id() % 1_000) as u16 * 20;
        loop {
            let base = origin + NEXT_WINDOW.fetch_add(len + 1, Ordering::SeqCst);
            let held: Vec<_> = (base..base + busy)
                .filter_map(|p| TcpListener::bind(("127.0.0.1", p)).ok())
                .collect();
            let rest_free =
                (base + busy..base + len).all(|p| TcpListener::bind(("127.0.0.1", p)).is_ok());
            if held.len() == busy as usize && rest_free {
                return (held, base, base + len - 1);
            }
        }
    }

    fn config(start: u16, end: u16, marker: Option<PathBuf>) -> ServerConfig {
        ServerConfig {
            port_start: start,
            port_end: end,
            marker_path: marker,
            ..ServerConfig::default()
        }
    }

    fn get(port: u16, target: &str) -> (u16, serde_json::Value) {
        let mut conn = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(conn, "GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        let mut response = String::new();
        conn.read_to_string(&mut response).unwrap();
        let status: u16 = response.split_whitespace().nth(1).unwrap().parse().unwrap();
        let body = response.split_once("\r\n\r\n").unwrap().1;
        (status, serde_json::from_str(body).unwrap())
    }

    fn started(registry: Arc<MemoryRegistry>) -> DependencyQueryServer {
        let (_held, start, end) = port_window(3, 0);
        let server = DependencyQueryServer::new(registry, config(start, end, None));
        assert!(server.start());
        server
    }

    #[test]
    fn health_reports_port_and_pid() {
        let server = started(registry());
        let port = server.port().unwrap();
        let (status, body) = get(port, "/health");
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["port"], port);
        assert_eq!(body["pid"], std::process::id());
    }

    #[test]
    fn object_suffix_resolves_like_package_path() {
        let server = started(registry());
        let port = server.port().unwrap();
        let (s1, bare) = get(port, "/dependencies?asset=/ns/Foo/Bar");
        let (s2, suffixed) = get(port, "/dependencies?asset=/ns/Foo/Bar.Bar");
        assert_eq!((s1, s2), (200, 200));
        assert_eq!(bare, suffixed);
        assert_eq!(bare["asset"], "/ns/Foo/Bar");
        assert_eq!(bare["dependencies"][0]["package"], "/ns/Baz");
    }

    #[test]
    fn referencers_route_inverts_edges() {
        let server = started(registry());
        let (status, body) = get(server.port().unwrap(), "/referencers?asset=%2Fns%2FBaz");
        assert_eq!(status, 200);
        let refs = body["referencers"].as_array().unwrap();
        assert!(refs.iter().any(|e| e["package"] == "/ns/Foo/Bar"));
    }

    #[test]
    fn missing_param_is_400_and_unknown_asset_is_404() {
        let server = started(registry());
        let port = server.port().unwrap();

        let (status, body) = get(port, "/dependencies");
        assert_eq!(status, 400);
        assert!(body["error"].is_string());
        assert!(body["usage"].as_str().unwrap().starts_with("/dependencies"));

        let (status, _) = get(port, "/referencers?asset=");
        assert_eq!(status, 400);

        let (status, body) = get(port, "/dependencies?asset=/ns/DoesNotExist");
        assert_eq!(status, 404);
        assert_eq!(body["asset"], "/ns/DoesNotExist");
        assert!(body["hint"].is_string());

        let (status, _) = get(port, "/dependencies?asset=not-a-path");
        assert_eq!(status, 404);
    }

    #[test]
    fn unknown_route_and_method_are_404() {
        let server = started(registry());
        let port = server.port().unwrap();
        let (status, body) = get(port, "/nope");
        assert_eq!(status, 404);
        assert!(body["error"].as_str().unwrap().contains("/health"));

        let mut conn = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(conn, "POST /health HTTP/1.1\r\nContent-Length: 0\r\n\r\n").unwrap();
        let mut response = String::new();
        conn.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 404"), "{response}");
    }

    #[test]
    fn falls_back_to_first_free_port_and_records_it() {
        let tmp = TempDir::new().unwrap();
        let marker_path = tmp.path().join(".asset-audit-server.json");
        let (_held, start, end) = port_window(4, 2);

        let server =
            DependencyQueryServer::new(registry(), config(start, end, Some(marker_path.clone())));
        assert!(server.start());
        assert_eq!(server.status(), ServerStatus::Listening(start + 2));

        let marker = DiscoveryMarker::read(&marker_path).unwrap();
        assert_eq!(marker.port, start + 2);
        assert_eq!(marker.pid, std::process::id());

        server.stop();
        assert!(!marker_path.exists());
    }

    #[test]
    fn exhausted_range_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let marker_path = tmp.path().join(".asset-audit-server.json");
        let (_held, start, end) = port_window(2, 2);

        let server =
            DependencyQueryServer::new(registry(), config(start, end, Some(marker_path.clone())));
        assert!(!server.start());
        assert_eq!(server.status(), ServerStatus::Stopped);
        assert_eq!(server.router.len(), 0);
        assert!(!marker_path.exists());
    }

    #[test]
    fn stop_is_idempotent_and_releases_the_port() {
        let never_started = DependencyQueryServer::new(registry(), ServerConfig::default());
        never_started.stop();
        assert_eq!(never_started.status(), ServerStatus::Stopped);

        let server = started(registry());
        let port = server.port().unwrap();
        assert_eq!(server.router.len(), 3);
        server.stop();
        server.stop();
        assert_eq!(server.status(), ServerStatus::Stopped);
        assert_eq!(server.router.len(), 0);
        assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
    }
}
