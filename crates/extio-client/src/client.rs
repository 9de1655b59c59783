//! Blocking facade over the async session actor.
//!
//! The ExtIO API is synchronous by contract and is invoked from whatever
//! thread the host application happens to use. Each facade call posts a
//! command to the session actor and blocks on a bounded sync channel; the
//! actor (or one of its fan-out subtasks) releases the caller with the
//! response, or with nothing when the session cannot serve it, in which
//! case the entry point returns its defined failure value.

use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, trace};

use extio_stream::DialogReply;
use extio_wire::hw::hw_type;
use extio_wire::{message_name, Message};

use crate::config::ClientConfig;
use crate::session::{Command, Session};
use crate::HostCallback;

/// Cached result of the remote `InitHW`.
#[derive(Debug, Clone)]
pub struct HwInit {
    pub result: bool,
    pub name: String,
    pub model: String,
    pub hw_type: i32,
}

/// Handle to the client session. One per loaded shim; cheap to clone.
#[derive(Clone)]
pub struct RadioClient {
    cmd_tx: mpsc::Sender<Command>,
    cfg: ClientConfig,
}

impl RadioClient {
    /// Spawn the session actor on its own background runtime thread. The
    /// connection itself is lazy: it is first attempted when a facade call
    /// needs it.
    pub fn new(cfg: ClientConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let callback = Arc::new(Mutex::new(None));
        let session_cfg = cfg.clone();
        let spawned = std::thread::Builder::new()
            .name("extio-client".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(%e, "failed to build client runtime");
                        return;
                    }
                };
                runtime.block_on(Session::new(session_cfg, cmd_rx, callback).run());
            });
        if let Err(e) = spawned {
            error!(%e, "failed to spawn client session thread");
        }
        Self { cmd_tx, cfg }
    }

    /// Ensure the session is connected and the remote api is loaded.
    /// Returns false after the connect-wait timeout.
    pub fn start(&self) -> bool {
        let (tx, rx) = sync_channel(1);
        if self
            .cmd_tx
            .blocking_send(Command::EnsureStarted { ready: tx })
            .is_err()
        {
            return false;
        }
        rx.recv_timeout(Duration::from_millis(self.cfg.connect_wait_ms))
            .is_ok()
    }

    /// Orderly shutdown; bounded by the stop timeout.
    pub fn stop(&self) {
        let (tx, rx) = sync_channel(1);
        if self.cmd_tx.blocking_send(Command::Stop { done: tx }).is_err() {
            return;
        }
        if rx
            .recv_timeout(Duration::from_millis(self.cfg.stop_wait_ms))
            .is_err()
        {
            trace!("session stop timed out");
        }
    }

    fn call(&self, msg: Message) -> Option<DialogReply> {
        trace!(name = message_name(&msg), "new request");
        let (tx, rx) = sync_channel(1);
        if self
            .cmd_tx
            .blocking_send(Command::Call { msg, reply: tx })
            .is_err()
        {
            return None;
        }
        // The actor always resolves or drops the sender; no extra timeout.
        rx.recv().ok().flatten()
    }

    fn notify(&self, msg: Message) {
        trace!(name = message_name(&msg), "new notify");
        let (tx, rx) = sync_channel(1);
        if self
            .cmd_tx
            .blocking_send(Command::Notify { msg, done: tx })
            .is_err()
        {
            return;
        }
        let _ = rx.recv();
    }

    pub fn set_callback(&self, callback: Option<HostCallback>) {
        let (tx, rx) = sync_channel(1);
        if self
            .cmd_tx
            .blocking_send(Command::SetCallback { callback, done: tx })
            .is_err()
        {
            return;
        }
        let _ = rx.recv();
    }

    /// Remote `InitHW`; connects first if necessary. The server answers
    /// from its cache without re-entering the vendor.
    pub fn init_hw(&self) -> Option<HwInit> {
        if !self.start() {
            return None;
        }
        let reply = self.call(Message::InitHw {
            result: None,
            name: None,
            model: None,
            hw_type: None,
        })?;
        match reply.msg {
            Message::InitHw {
                result,
                name,
                model,
                hw_type: hwt,
            } => Some(HwInit {
                result: result.unwrap_or(true),
                name: name.unwrap_or_default(),
                model: model.unwrap_or_default(),
                hw_type: hwt.unwrap_or(hw_type::NONE),
            }),
            _ => None,
        }
    }

    /// The remote `OpenHW` already ran during `LoadExtIoApi`; the local
    /// answer is always success.
    pub fn open_hw(&self) -> bool {
        true
    }

    pub fn set_hw_lo(&self, lo_freq: i32) -> i32 {
        match self.call(Message::SetHwLo {
            result: None,
            lo_freq: Some(lo_freq),
        }) {
            Some(reply) => match reply.msg {
                Message::SetHwLo { result, .. } => result.unwrap_or(-1),
                _ => -1,
            },
            None => -1,
        }
    }

    pub fn set_hw_lo64(&self, lo_freq: i64) -> i64 {
        match self.call(Message::SetHwLo64 {
            result: None,
            lo_freq: Some(lo_freq),
        }) {
            Some(reply) => match reply.msg {
                Message::SetHwLo64 { result, .. } => result.unwrap_or(-1),
                _ => -1,
            },
            None => -1,
        }
    }

    pub fn get_hw_sr(&self) -> i32 {
        match self.call(Message::GetHwSr { result: None }) {
            Some(reply) => match reply.msg {
                Message::GetHwSr { result } => result.unwrap_or(-1),
                _ => -1,
            },
            None => -1,
        }
    }

    pub fn start_hw(&self, ext_lo_freq: i32) -> i32 {
        match self.call(Message::StartHw {
            result: None,
            ext_lo_freq: Some(ext_lo_freq),
        }) {
            Some(reply) => match reply.msg {
                Message::StartHw { result, .. } => result.unwrap_or(-1),
                _ => -1,
            },
            None => -1,
        }
    }

    pub fn stop_hw(&self) {
        let _ = self.call(Message::StopHw);
    }

    pub fn version_info(&self, progname: &str, ver_major: i32, ver_minor: i32) {
        let _ = self.call(Message::VersionInfo {
            progname: Some(progname.into()),
            ver_major: Some(ver_major),
            ver_minor: Some(ver_minor),
        });
    }

    pub fn get_attenuators(&self, atten_idx: i32) -> (i32, f32) {
        match self.call(Message::GetAttenuators {
            result: None,
            atten_idx: Some(atten_idx),
            attenuation: None,
        }) {
            Some(reply) => match reply.msg {
                Message::GetAttenuators {
                    result,
                    attenuation,
                    ..
                } => (result.unwrap_or(-1), attenuation.unwrap_or(0.0)),
                _ => (-1, 0.0),
            },
            None => (-1, 0.0),
        }
    }

    pub fn get_actual_att_idx(&self) -> i32 {
        match self.call(Message::GetActualAttIdx { result: None }) {
            Some(reply) => match reply.msg {
                Message::GetActualAttIdx { result } => result.unwrap_or(-1),
                _ => -1,
            },
            None => -1,
        }
    }

    pub fn show_mgc(&self, agc_idx: i32) -> i32 {
        match self.call(Message::ExtIoShowMgc {
            result: None,
            agc_idx: Some(agc_idx),
        }) {
            Some(reply) => match reply.msg {
                Message::ExtIoShowMgc { result, .. } => result.unwrap_or(0),
                _ => 0,
            },
            None => 0,
        }
    }

    pub fn show_gui(&self) {
        self.notify(Message::ShowGui);
    }

    pub fn hide_gui(&self) {
        self.notify(Message::HideGui);
    }

    pub fn switch_gui(&self) {
        self.notify(Message::SwitchGui);
    }

    pub fn get_agcs(&self, agc_idx: i32) -> (i32, String) {
        match self.call(Message::ExtIoGetAgcs {
            result: None,
            agc_idx: Some(agc_idx),
            text: None,
        }) {
            Some(reply) => match reply.msg {
                Message::ExtIoGetAgcs { result, text, .. } => {
                    (result.unwrap_or(-1), text.unwrap_or_default())
                }
                _ => (-1, String::new()),
            },
            None => (-1, String::new()),
        }
    }

    pub fn get_actual_agc_idx(&self) -> i32 {
        match self.call(Message::ExtIoGetActualAgcIdx { result: None }) {
            Some(reply) => match reply.msg {
                Message::ExtIoGetActualAgcIdx { result } => result.unwrap_or(-1),
                _ => -1,
            },
            None => -1,
        }
    }

    pub fn get_mgcs(&self, mgc_idx: i32) -> (i32, f32) {
        match self.call(Message::ExtIoGetMgcs {
            result: None,
            mgc_idx: Some(mgc_idx),
            gain: None,
        }) {
            Some(reply) => match reply.msg {
                Message::ExtIoGetMgcs { result, gain, .. } => {
                    (result.unwrap_or(-1), gain.unwrap_or(0.0))
                }
                _ => (-1, 0.0),
            },
            None => (-1, 0.0),
        }
    }

    pub fn get_actual_mgc_idx(&self) -> i32 {
        match self.call(Message::ExtIoGetActualMgcIdx { result: None }) {
            Some(reply) => match reply.msg {
                Message::ExtIoGetActualMgcIdx { result } => result.unwrap_or(-1),
                _ => -1,
            },
            None => -1,
        }
    }

    pub fn get_srates(&self, srate_idx: i32) -> (i32, f64) {
        match self.call(Message::ExtIoGetSrates {
            result: None,
            srate_idx: Some(srate_idx),
            samplerate: None,
        }) {
            Some(reply) => match reply.msg {
                Message::ExtIoGetSrates {
                    result, samplerate, ..
                } => (result.unwrap_or(-1), samplerate.unwrap_or(0.0)),
                _ => (-1, 0.0),
            },
            None => (-1, 0.0),
        }
    }

    pub fn get_actual_srate_idx(&self) -> i32 {
        match self.call(Message::ExtIoGetActualSrateIdx { result: None }) {
            Some(reply) => match reply.msg {
                Message::ExtIoGetActualSrateIdx { result } => result.unwrap_or(-1),
                _ => -1,
            },
            None => -1,
        }
    }

    pub fn set_srate(&self, srate_idx: i32) -> i32 {
        match self.call(Message::ExtIoSetSrate {
            result: None,
            srate_idx: Some(srate_idx),
        }) {
            Some(reply) => match reply.msg {
                Message::ExtIoSetSrate { result, .. } => result.unwrap_or(-1),
                _ => -1,
            },
            None => -1,
        }
    }

    pub fn get_bandwidth(&self, srate_idx: i32) -> i32 {
        match self.call(Message::ExtIoGetBandwidth {
            result: None,
            srate_idx: Some(srate_idx),
        }) {
            Some(reply) => match reply.msg {
                Message::ExtIoGetBandwidth { result, .. } => result.unwrap_or(-1),
                _ => -1,
            },
            None => -1,
        }
    }

    /// Protocol-level ping; the raw reply is returned so callers can see an
    /// `Error` answer from a server that does not handle it.
    pub fn ping(&self) -> Option<DialogReply> {
        self.call(Message::Ping)
    }
}
