//! Live reload over a WebSocket.
//!
//! One thread accepts browser connections, another broadcasts [`Signal`]s
//! to every connected client. Pages served by the dev server carry a small
//! client script that reloads the page, or for [`Signal::Inject`] only
//! refreshes its stylesheets.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tungstenite::{Message, WebSocket};

/// Idle connections kept around; older ones are closed first.
const MAX_CLIENTS: usize = 10;

/// How often the broadcast thread checks for shutdown while idle.
const POLL: Duration = Duration::from_millis(200);

/// Longest wait for a client's upgrade request.
const HANDSHAKE: Duration = Duration::from_secs(1);

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// A notification pushed to connected browsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    /// Full page reload.
    Reload,
    /// Swap stylesheets in place, keeping page state.
    Inject,
}

/// Client side of the protocol.
pub fn client_script(port: u16) -> String {
    format!(
        r#"
(() => {{
  const socket = new WebSocket(`ws://${{location.hostname || "localhost"}}:{port}`);
  socket.addEventListener("message", event => {{
    const signal = JSON.parse(event.data);
    if (signal.type !== "inject") {{
      window.location.reload();
      return;
    }}
    for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
      const url = new URL(link.href);
      url.searchParams.set("livereload", Date.now());
      link.href = url.href;
    }}
  }});
}})();
"#
    )
}

/// Adds the client script to an HTML document, before `</body>` when
/// there is one.
pub fn inject_script(html: &str, port: u16) -> String {
    let tag = format!("<script>{}</script>", client_script(port));

    match html.rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..at]);
            out.push_str(&tag);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}

/// Binds `preferred`, or any free port when it is taken.
pub(super) fn reserve_port(preferred: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

/// The running WebSocket side. Dropping it stops both threads and closes
/// the listening socket.
pub(super) struct LiveReload {
    port: u16,
    stop: Arc<AtomicBool>,
    tx: Option<Sender<Signal>>,
    threads: Vec<JoinHandle<()>>,
}

impl LiveReload {
    pub(super) fn start(preferred: u16) -> std::io::Result<Self> {
        let (listener, port) = reserve_port(preferred)?;
        if preferred != 0 && port != preferred {
            tracing::warn!("live reload port {preferred} is taken, using {port}");
        }

        let clients = Clients::default();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = channel();

        let thread_i = new_thread_ws_incoming(listener, clients.clone(), stop.clone());
        let thread_o = new_thread_ws_broadcast(clients, rx, stop.clone());

        Ok(Self {
            port,
            stop,
            tx: Some(tx),
            threads: vec![thread_i, thread_o],
        })
    }

    pub(super) fn port(&self) -> u16 {
        self.port
    }

    pub(super) fn sender(&self) -> Option<Sender<Signal>> {
        self.tx.clone()
    }
}

impl Drop for LiveReload {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.tx = None;
        // wake the accept loop so it can observe the flag
        let _ = TcpStream::connect(("127.0.0.1", self.port));

        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

fn new_thread_ws_incoming(
    server: TcpListener,
    clients: Clients,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            if stop.load(Ordering::SeqCst) {
                break;
            }

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("live reload connection failed: {e}");
                    continue;
                }
            };

            // a silent client must not hold up everyone queued behind it
            if let Err(e) = stream.set_read_timeout(Some(HANDSHAKE)) {
                tracing::warn!("live reload connection failed: {e}");
                continue;
            }

            match tungstenite::accept(stream) {
                Ok(socket) => match clients.lock() {
                    Ok(mut clients) => clients.push(socket),
                    Err(_) => break,
                },
                Err(e) => tracing::debug!("live reload handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_broadcast(
    clients: Clients,
    rx: Receiver<Signal>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            let signal = match rx.recv_timeout(POLL) {
                Ok(signal) => signal,
                Err(RecvTimeoutError::Timeout) if !stop.load(Ordering::SeqCst) => continue,
                Err(_) => break,
            };

            let message = match serde_json::to_string(&signal) {
                Ok(json) => Message::text(json),
                Err(e) => {
                    tracing::error!("couldn't encode {signal:?}: {e}");
                    continue;
                }
            };

            let Ok(mut clients) = clients.lock() else {
                break;
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(message.clone()) {
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(e))
                        if matches!(e.kind(), ErrorKind::BrokenPipe | ErrorKind::ConnectionReset) =>
                    {
                        broken.push(i);
                    }
                    Err(
                        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                    ) => {
                        broken.push(i);
                    }
                    Err(e) => {
                        tracing::error!("live reload error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }

            tracing::debug!("sent {signal:?} to {} client(s)", clients.len());
        }

        if let Ok(mut clients) = clients.lock() {
            for socket in clients.iter_mut() {
                socket.close(None).ok();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_encode_as_tagged_json() {
        assert_eq!(serde_json::to_string(&Signal::Reload).unwrap(), r#"{"type":"reload"}"#);
        assert_eq!(serde_json::to_string(&Signal::Inject).unwrap(), r#"{"type":"inject"}"#);
    }

    #[test]
    fn script_goes_before_closing_body() {
        let html = inject_script("<html><body><p>x</p></body></html>", 4000);

        assert!(html.starts_with("<html><body><p>x</p><script>"));
        assert!(html.ends_with("</script></body></html>"));
        assert!(html.contains(":4000`"));
    }

    #[test]
    fn script_is_appended_to_fragments() {
        let html = inject_script("<p>x</p>", 4000);
        assert!(html.starts_with("<p>x</p><script>"));
    }

    #[test]
    fn taken_port_falls_back() {
        let (first, port) = reserve_port(0).unwrap();
        let (_second, other) = reserve_port(port).unwrap();

        assert_ne!(port, other);
        drop(first);
    }

    fn connect(port: u16) -> WebSocket<TcpStream> {
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        let url = format!("ws://127.0.0.1:{port}");
        let (socket, _) = tungstenite::client(url, stream).unwrap();
        socket
    }

    #[test]
    fn silent_connection_does_not_block_others() {
        let live = LiveReload::start(0).unwrap();
        let _silent = TcpStream::connect(("127.0.0.1", live.port())).unwrap();

        let socket = connect(live.port());

        drop(socket);
        drop(live);
    }

    #[test]
    fn broadcast_reaches_clients() {
        let live = LiveReload::start(0).unwrap();
        let mut socket = connect(live.port());
        socket.get_mut().set_read_timeout(Some(Duration::from_millis(100))).unwrap();

        // the accept thread registers the client asynchronously
        let tx = live.sender().unwrap();
        let mut received = None;
        for _ in 0..50 {
            tx.send(Signal::Inject).unwrap();
            if let Ok(msg) = socket.read() {
                received = Some(msg);
                break;
            }
        }

        let text = received.unwrap().into_text().unwrap();
        assert_eq!(text.as_str(), r#"{"type":"inject"}"#);
        drop(socket);
        drop(live);
    }
}
