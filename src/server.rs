//! Development server.
//!
//! Files are looked up through [`ServerRoots`] on every request, so the
//! server always reflects the current state of the staging tree without
//! ever writing to it. HTML documents are served with the live reload
//! client script appended.

mod livereload;
mod resolve;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use camino::Utf8Path;
use console::style;
use tokio::sync::oneshot;
use tower::ServiceExt;
use tower_http::services::ServeFile;

pub use self::livereload::{Signal, client_script, inject_script};
pub use self::resolve::{RouteOverride, ServerRoots};
use self::livereload::LiveReload;
use crate::config::ServerConfig;
use crate::error::ServeError;

struct AppState {
    roots: ServerRoots,
    reload_port: u16,
}

/// A running dev server. Dropping it shuts the HTTP listener down
/// gracefully and stops the live reload threads.
pub struct DevServer {
    addr: SocketAddr,
    live: LiveReload,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DevServer {
    /// Binds both ports and starts serving in the background.
    pub fn start(config: &ServerConfig) -> Result<Self, ServeError> {
        let live = LiveReload::start(config.reload_port).map_err(|source| ServeError::Bind {
            what: "live reload",
            port: config.reload_port,
            source,
        })?;

        let roots = ServerRoots::new(
            config.roots.iter().cloned(),
            config
                .routes
                .iter()
                .map(|(prefix, dir)| RouteOverride::new(prefix, dir.clone())),
        );

        let bind = |source: std::io::Error| ServeError::Bind {
            what: "http",
            port: config.port,
            source,
        };
        let listener = std::net::TcpListener::bind(("127.0.0.1", config.port)).map_err(bind)?;
        listener.set_nonblocking(true).map_err(bind)?;
        let addr = listener.local_addr().map_err(bind)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let state = Arc::new(AppState {
            roots,
            reload_port: live.port(),
        });
        let router = Router::new().fallback(serve_file).with_state(state);
        let (shutdown, signal) = oneshot::channel::<()>();

        let thread = thread::spawn(move || {
            let result = runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)?;
                axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        signal.await.ok();
                    })
                    .await
            });

            if let Err(e) = result {
                tracing::error!("dev server stopped: {e}");
            }
        });

        let url = format!("http://localhost:{}/", addr.port());
        tracing::info!(url = %style(url).yellow(), "serving");

        Ok(Self {
            addr,
            live,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn reload_port(&self) -> u16 {
        self.live.port()
    }

    /// Channel for pushing [`Signal`]s to connected browsers.
    pub fn signals(&self) -> Option<Sender<Signal>> {
        self.live.sender()
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send(()).ok();
        }
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

async fn serve_file(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let Some(path) = state.roots.resolve(request.uri().path()) else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    if is_html(&path) {
        return match tokio::fs::read_to_string(&path).await {
            Ok(html) => Html(inject_script(&html, state.reload_port)).into_response(),
            Err(e) => {
                tracing::error!("couldn't read {path}: {e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    }

    match ServeFile::new(path.as_std_path()).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

fn is_html(path: &Utf8Path) -> bool {
    matches!(path.extension(), Some("html" | "htm"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    use camino::Utf8PathBuf;

    use super::*;

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        write!(
            stream,
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn serves_layered_roots_with_reload_script() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        for (path, content) in [
            ("temp/index.html", "<body>staged</body>"),
            ("src/assets/app.css", "a{}"),
            ("deps/lib.js", "lib()"),
        ] {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        let config = ServerConfig {
            port: 0,
            reload_port: 0,
            roots: vec![root.join("temp"), root.join("src")],
            routes: [("/node_modules".to_string(), root.join("deps"))].into(),
            debounce_ms: 0,
        };
        let server = DevServer::start(&config).unwrap();

        let index = get(server.addr(), "/");
        assert!(index.starts_with("HTTP/1.1 200"));
        assert!(index.contains("staged<script>"));
        assert!(index.contains(&format!(":{}`", server.reload_port())));

        let css = get(server.addr(), "/assets/app.css");
        assert!(css.starts_with("HTTP/1.1 200"));
        assert!(css.ends_with("a{}"));

        let lib = get(server.addr(), "/node_modules/lib.js");
        assert!(lib.ends_with("lib()"));

        assert!(get(server.addr(), "/missing.js").starts_with("HTTP/1.1 404"));

        drop(server);
    }
}
