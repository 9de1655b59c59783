//! TCP acceptor and session registry.
//!
//! Listens on IPv4, spawns one session thread per accepted socket, and
//! owns the stop/join handles for every live session. Sessions are only
//! referenced from elsewhere through handles and alive flags; the
//! registry is the single strong owner.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use extio_stream::set_keep_alive;

use crate::session::ServerSession;
use crate::vendor::VendorLoader;

struct SessionEntry {
    stop: Option<oneshot::Sender<()>>,
    join: Option<std::thread::JoinHandle<()>>,
}

pub struct Acceptor {
    listener: TcpListener,
    loader: VendorLoader,
    sessions: Vec<SessionEntry>,
}

impl Acceptor {
    pub async fn bind(port: u16, loader: VendorLoader) -> io::Result<Self> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
        let listener = socket.listen(64)?;
        info!(port = listener.local_addr()?.port(), "listening");
        Ok(Self {
            listener,
            loader,
            sessions: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` resolves, then stop and join every session.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "new client accepted");
                        self.spawn_session(stream);
                    }
                    Err(e) => warn!(%e, "accept failed"),
                },
            }
        }
        self.stop_all();
    }

    fn spawn_session(&mut self, stream: TcpStream) {
        if let Err(e) = set_keep_alive(&stream) {
            warn!(%e, "failed to enable keep-alive");
        }
        // Detach from this runtime; the session re-registers the socket on
        // its own.
        let std_stream = match stream.into_std() {
            Ok(s) => s,
            Err(e) => {
                warn!(%e, "failed to detach accepted socket");
                return;
            }
        };

        let loader = self.loader.clone();
        let (stop_tx, stop_rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("extio-session".into())
            .spawn(move || {
                // One single-threaded runtime per session: vendor libraries
                // must only ever be entered from one thread.
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(%e, "failed to build session runtime");
                        return;
                    }
                };
                runtime.block_on(async move {
                    match ServerSession::new(std_stream, loader) {
                        Ok(session) => session.run(stop_rx).await,
                        Err(e) => warn!(%e, "session setup failed"),
                    }
                });
            });

        match spawned {
            Ok(join) => {
                self.sessions.retain(|entry| {
                    entry
                        .join
                        .as_ref()
                        .map(|j| !j.is_finished())
                        .unwrap_or(false)
                });
                self.sessions.push(SessionEntry {
                    stop: Some(stop_tx),
                    join: Some(join),
                });
            }
            Err(e) => error!(%e, "failed to spawn session thread"),
        }
    }

    fn stop_all(mut self) {
        info!("stopping sessions");
        for entry in &mut self.sessions {
            if let Some(stop) = entry.stop.take() {
                let _ = stop.send(());
            }
        }
        for entry in &mut self.sessions {
            if let Some(join) = entry.join.take() {
                let _ = join.join();
            }
        }
    }
}
