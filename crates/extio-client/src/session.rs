//! The client session actor.
//!
//! Owns the connection and its reconnect state machine, and is the single
//! place host-visible side effects happen: request fan-out, IQ-stream
//! delivery into the host callback, and the synthesized stop/disconnect
//! notifications when an established connection is lost.
//!
//! The actor runs on the shim's background runtime; the blocking facade in
//! [`crate::client`] posts [`Command`]s and waits on bounded sync channels.

use std::ffi::c_void;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, trace};

use extio_stream::{
    start_dialog, AliveGuard, ChannelError, DialogHandle, DialogReply, InboundMessage,
    PacketChannel,
};
use extio_wire::hw::status;
use extio_wire::{message_name, ErrorCode, Message, PROTOCOL_VERSION};

use crate::config::ClientConfig;
use crate::{HostCallback, CLIENT_NAME};

pub(crate) type CallbackCell = Arc<Mutex<Option<HostCallback>>>;

pub(crate) enum Command {
    /// Kick the connection if necessary and release `ready` once the ExtIO
    /// api is loaded.
    EnsureStarted { ready: SyncSender<()> },
    /// One request/response round trip; `None` on any failure.
    Call {
        msg: Message,
        reply: SyncSender<Option<DialogReply>>,
    },
    /// Fire-and-forget notify (`dialog_id` 0); acked once written.
    Notify { msg: Message, done: SyncSender<()> },
    SetCallback {
        callback: Option<HostCallback>,
        done: SyncSender<()>,
    },
    Stop { done: SyncSender<()> },
}

struct Link {
    dialog: DialogHandle,
    inbound: mpsc::Receiver<InboundMessage>,
    driver: JoinHandle<Result<(), ChannelError>>,
}

pub(crate) struct Session {
    cfg: ClientConfig,
    cmd_rx: mpsc::Receiver<Command>,
    callback: CallbackCell,
    link: Option<Link>,
    api_loaded: bool,
    started: bool,
    reconnect_at: Option<Instant>,
    waiters: Vec<SyncSender<()>>,
    alive: AliveGuard,
}

enum Event {
    Cmd(Option<Command>),
    Inbound(Option<InboundMessage>),
}

impl Session {
    pub(crate) fn new(
        cfg: ClientConfig,
        cmd_rx: mpsc::Receiver<Command>,
        callback: CallbackCell,
    ) -> Self {
        Self {
            cfg,
            cmd_rx,
            callback,
            link: None,
            api_loaded: false,
            started: false,
            reconnect_at: None,
            waiters: Vec::new(),
            alive: AliveGuard::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        trace!("client session started");
        loop {
            let keep_going = if self.link.is_some() {
                self.run_connected().await
            } else {
                self.run_disconnected().await
            };
            if !keep_going {
                break;
            }
        }
        self.shutdown();
        trace!("client session finished");
    }

    async fn run_disconnected(&mut self) -> bool {
        tokio::select! {
            cmd = self.cmd_rx.recv() => match cmd {
                Some(cmd) => self.handle_cmd(cmd).await,
                None => false,
            },
            _ = sleep_until_opt(self.reconnect_at) => {
                self.reconnect_at = None;
                self.try_connect().await;
                true
            }
        }
    }

    async fn run_connected(&mut self) -> bool {
        let event = {
            let Some(link) = self.link.as_mut() else {
                return true;
            };
            tokio::select! {
                cmd = self.cmd_rx.recv() => Event::Cmd(cmd),
                inbound = link.inbound.recv() => Event::Inbound(inbound),
            }
        };
        match event {
            Event::Cmd(Some(cmd)) => self.handle_cmd(cmd).await,
            Event::Cmd(None) => false,
            Event::Inbound(Some(inbound)) => {
                self.deliver_inbound(inbound);
                true
            }
            Event::Inbound(None) => {
                self.on_disconnect();
                true
            }
        }
    }

    async fn handle_cmd(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::EnsureStarted { ready } => {
                self.started = true;
                if self.api_loaded {
                    let _ = ready.send(());
                } else {
                    self.waiters.push(ready);
                    if self.link.is_none() && self.reconnect_at.is_none() {
                        self.try_connect().await;
                    }
                }
                true
            }
            Command::Call { msg, reply } => {
                match self.link.as_ref() {
                    Some(link) => {
                        let dialog = link.dialog.clone();
                        let alive = self.alive.flag();
                        tokio::spawn(async move {
                            let result = dialog.send_request(msg).await;
                            if !alive.is_alive() {
                                return;
                            }
                            match result {
                                Ok(response) => {
                                    let _ = reply.send(Some(response));
                                }
                                Err(e) => {
                                    trace!(%e, "request failed");
                                    let _ = reply.send(None);
                                }
                            }
                        });
                    }
                    // Not connected: release the caller immediately so the
                    // facade can return its failure value.
                    None => {
                        let _ = reply.send(None);
                    }
                }
                true
            }
            Command::Notify { msg, done } => {
                match self.link.as_ref() {
                    Some(link) => {
                        let dialog = link.dialog.clone();
                        let alive = self.alive.flag();
                        tokio::spawn(async move {
                            if let Err(e) = dialog.send_message(msg).await {
                                trace!(%e, "notify failed");
                            }
                            if alive.is_alive() {
                                let _ = done.send(());
                            }
                        });
                    }
                    None => {
                        let _ = done.send(());
                    }
                }
                true
            }
            Command::SetCallback { callback, done } => {
                trace!(present = callback.is_some(), "SetCallback");
                if let Ok(mut cell) = self.callback.lock() {
                    *cell = callback;
                }
                let _ = done.send(());
                true
            }
            Command::Stop { done } => {
                trace!("stop requested");
                self.shutdown();
                let _ = done.send(());
                false
            }
        }
    }

    async fn try_connect(&mut self) {
        if !self.started {
            return;
        }
        trace!(
            host = %self.cfg.server_addr,
            port = self.cfg.server_port,
            "connecting"
        );
        let channel =
            match PacketChannel::connect(&self.cfg.server_addr, self.cfg.server_port).await {
                Ok(channel) => channel,
                Err(e) => {
                    trace!(%e, "connect failed");
                    self.schedule_reconnect();
                    return;
                }
            };

        let (dialog, inbound, driver) = start_dialog(channel);
        match self.handshake(&dialog).await {
            Ok(()) => {
                info!("connected, ExtIO api loaded");
                self.link = Some(Link {
                    dialog,
                    inbound,
                    driver,
                });
                self.api_loaded = true;
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(());
                }
                // The host is not told about a (re)established connection;
                // it issues StartHW again on its own schedule.
            }
            Err(e) => {
                trace!(%e, "handshake failed");
                driver.abort();
                self.schedule_reconnect();
            }
        }
    }

    /// Hello, then LoadExtIoApi. Each round trip is bounded by the I/O
    /// timeout so a dead peer cannot stall the reconnect loop.
    async fn handshake(&self, dialog: &DialogHandle) -> Result<(), extio_stream::DialogError> {
        let wait = Duration::from_millis(self.cfg.io_timeout_ms);

        let hello = Message::Hello {
            version: Some(PROTOCOL_VERSION),
            client_name: Some(CLIENT_NAME.into()),
        };
        let reply = tokio::time::timeout(wait, dialog.send_request(hello))
            .await
            .map_err(|_| extio_stream::DialogError::ConnectionClosed)??;
        match &reply.msg {
            Message::Hello { client_name, .. } => {
                trace!(peer = client_name.as_deref().unwrap_or(""), "hello response received");
            }
            other => trace!(name = message_name(other), "inconsistent hello response"),
        }

        let reply = tokio::time::timeout(wait, dialog.send_request(Message::LoadExtIoApi))
            .await
            .map_err(|_| extio_stream::DialogError::ConnectionClosed)??;
        if let Some(code) = reply.resultcode {
            if code != ErrorCode::Success {
                trace!(?code, "LoadExtIoApi reported failure");
            }
        }
        trace!("LoadExtIoApi response received");
        Ok(())
    }

    fn deliver_inbound(&mut self, inbound: InboundMessage) {
        match inbound.msg {
            Message::ExtIoCallback {
                cnt,
                status,
                iq_offs,
                iqdata,
            } => {
                let cnt = cnt.unwrap_or(0);
                let status = status.unwrap_or(0);
                if cnt <= 0 {
                    trace!(cnt, status, "stream status event");
                }
                let callback = self.host_callback();
                if let Some(callback) = callback {
                    let mut data = iqdata.unwrap_or_default();
                    let ptr = if data.is_empty() {
                        std::ptr::null_mut()
                    } else {
                        data.as_mut_ptr() as *mut c_void
                    };
                    // Safety: the buffer outlives the synchronous call and
                    // the host treats it as borrowed for its duration.
                    unsafe {
                        callback(cnt, status, iq_offs.unwrap_or(0.0), ptr);
                    }
                }
            }
            other => trace!(name = message_name(&other), "unexpected message"),
        }
    }

    fn on_disconnect(&mut self) {
        let was_ready = self.api_loaded;
        self.api_loaded = false;
        if let Some(link) = self.link.take() {
            link.driver.abort();
        }
        trace!("communication error, connection lost");
        if was_ready {
            self.notify_host_disconnected();
        }
        self.schedule_reconnect();
    }

    /// Lets the host unwind cleanly: a stop, then the disconnect marker.
    fn notify_host_disconnected(&self) {
        trace!("disconnected, forcing the host to stop");
        if let Some(callback) = self.host_callback() {
            // Safety: status-only events carry no buffer.
            unsafe {
                callback(-1, status::STOP, 0.0, std::ptr::null_mut());
                callback(-1, status::DISCONNECTED, 0.0, std::ptr::null_mut());
            }
        }
    }

    fn host_callback(&self) -> Option<HostCallback> {
        self.callback.lock().ok().and_then(|cell| *cell)
    }

    fn schedule_reconnect(&mut self) {
        if !self.started {
            return;
        }
        let delay = Duration::from_millis(self.cfg.reconnect_delay_ms);
        trace!(delay_ms = self.cfg.reconnect_delay_ms, "reconnect scheduled");
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            link.driver.abort();
        }
        self.api_loaded = false;
        self.reconnect_at = None;
        self.waiters.clear();
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
