//! Per-connection server session.
//!
//! One session per accepted socket, run on a dedicated single-threaded
//! runtime so the vendor library only ever sees one calling thread.
//! Requests are served strictly one at a time (intentional: vendors are
//! single-threaded), interleaved with draining the native callback's
//! sample queue into unsolicited `ExtIoCallback` messages.

use std::io;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use extio_stream::{
    start_dialog, AliveGuard, ChannelError, DialogHandle, InboundMessage, PacketChannel,
};
use extio_wire::hw::sample_size;
use extio_wire::{message_name, ErrorCode, Message, PROTOCOL_VERSION};

use crate::pump::MessagePump;
use crate::trampoline::{self, SlotClosure, SlotHandle};
use crate::vendor::{HwInfo, VendorApi, VendorLoader};
use crate::SERVER_NAME;

/// One native-callback invocation, copied out of the vendor's buffer.
struct IqChunk {
    cnt: i32,
    status: i32,
    iq_offs: f32,
    data: Vec<u8>,
}

enum Event {
    Stop,
    Stream(Option<IqChunk>),
    Inbound(Option<InboundMessage>),
}

pub struct ServerSession {
    dialog: DialogHandle,
    inbound: mpsc::Receiver<InboundMessage>,
    driver: JoinHandle<Result<(), ChannelError>>,
    loader: VendorLoader,
    vendor: Option<std::sync::Arc<dyn VendorApi>>,
    hw: Option<HwInfo>,
    open_ok: bool,
    slot: Option<SlotHandle>,
    pump: MessagePump,
    stream_tx: mpsc::UnboundedSender<IqChunk>,
    stream_rx: mpsc::UnboundedReceiver<IqChunk>,
    alive: AliveGuard,
}

impl ServerSession {
    /// Adopt an accepted socket. Must be called on the session's runtime.
    pub fn new(stream: std::net::TcpStream, loader: VendorLoader) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let stream = tokio::net::TcpStream::from_std(stream)?;
        let (dialog, inbound, driver) = start_dialog(PacketChannel::new(stream));
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        Ok(Self {
            dialog,
            inbound,
            driver,
            loader,
            vendor: None,
            hw: None,
            open_ok: false,
            slot: None,
            pump: MessagePump::new(),
            stream_tx,
            stream_rx,
            alive: AliveGuard::new(),
        })
    }

    pub async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        info!("session started");
        loop {
            let event = tokio::select! {
                _ = &mut stop => Event::Stop,
                chunk = self.stream_rx.recv() => Event::Stream(chunk),
                inbound = self.inbound.recv() => Event::Inbound(inbound),
            };
            match event {
                Event::Stop => {
                    trace!("stop requested");
                    break;
                }
                Event::Stream(Some(chunk)) => {
                    if !self.forward_stream(chunk).await {
                        break;
                    }
                }
                Event::Stream(None) => break,
                Event::Inbound(Some(request)) => {
                    if !self.serve(request).await {
                        break;
                    }
                }
                Event::Inbound(None) => {
                    trace!("connection closed");
                    break;
                }
            }
        }
        self.teardown();
        info!("session destroyed");
    }

    /// Relay one native-callback invocation as an unsolicited message.
    async fn forward_stream(&mut self, chunk: IqChunk) -> bool {
        if !self.open_ok {
            return true;
        }
        if chunk.cnt <= 0 {
            trace!(cnt = chunk.cnt, status = chunk.status, "callback status event");
        }
        let msg = Message::ExtIoCallback {
            cnt: Some(chunk.cnt),
            status: Some(chunk.status),
            iq_offs: Some(chunk.iq_offs),
            iqdata: if chunk.cnt > 0 { Some(chunk.data) } else { None },
        };
        match self.dialog.send_message(msg).await {
            Ok(()) => true,
            Err(e) => {
                trace!(%e, "stream send failed");
                false
            }
        }
    }

    async fn serve(&mut self, request: InboundMessage) -> bool {
        let did = request.dialog_id;
        trace!(did, name = message_name(&request.msg), "serving request");

        let response: Option<(Message, Option<ErrorCode>)> = match request.msg {
            Message::Hello { client_name, .. } => {
                trace!(peer = client_name.as_deref().unwrap_or(""), "hello received");
                Some((
                    Message::Hello {
                        version: Some(PROTOCOL_VERSION),
                        client_name: Some(SERVER_NAME.into()),
                    },
                    None,
                ))
            }

            Message::LoadExtIoApi => return self.load_extio_api(did).await,

            // Answered from the cache captured during LoadExtIoApi; the
            // vendor is not entered a second time.
            Message::InitHw { .. } => {
                let hw = self.hw.clone().unwrap_or_default();
                Some((
                    Message::InitHw {
                        result: Some(true),
                        name: Some(hw.name),
                        model: Some(hw.model),
                        hw_type: Some(hw.hw_type),
                    },
                    None,
                ))
            }

            Message::OpenHw { .. } => Some((
                match &self.vendor {
                    None => Message::error(ErrorCode::DllNotLoaded),
                    Some(vendor) => {
                        let vendor = vendor.clone();
                        let result = self.pump.send(move || vendor.open_hw()).unwrap_or(false);
                        Message::OpenHw {
                            result: Some(result),
                        }
                    }
                },
                None,
            )),

            Message::SetHwLo { lo_freq, .. } => Some((
                match &self.vendor {
                    None => Message::error(ErrorCode::DllNotLoaded),
                    Some(vendor) => Message::SetHwLo {
                        result: Some(vendor.set_hw_lo(lo_freq.unwrap_or(0))),
                        lo_freq: None,
                    },
                },
                None,
            )),

            Message::SetHwLo64 { lo_freq, .. } => Some((
                match &self.vendor {
                    None => Message::error(ErrorCode::DllNotLoaded),
                    Some(vendor) => {
                        let lo = lo_freq.unwrap_or(0);
                        let result = match vendor.set_hw_lo64(lo) {
                            Some(result) => result,
                            None => {
                                trace!("vendor lacks SetHWLO64, falling back to SetHWLO");
                                i64::from(vendor.set_hw_lo(lo as i32))
                            }
                        };
                        Message::SetHwLo64 {
                            result: Some(result),
                            lo_freq: None,
                        }
                    }
                },
                None,
            )),

            Message::GetHwSr { .. } => {
                let result = self.vendor.as_ref().map(|v| v.get_hw_sr()).unwrap_or(-1);
                Some((
                    Message::GetHwSr {
                        result: Some(result),
                    },
                    None,
                ))
            }

            Message::StartHw { ext_lo_freq, .. } => {
                let result = self
                    .vendor
                    .as_ref()
                    .map(|v| v.start_hw(ext_lo_freq.unwrap_or(-1)))
                    .unwrap_or(-1);
                Some((
                    Message::StartHw {
                        result: Some(result),
                        ext_lo_freq: None,
                    },
                    None,
                ))
            }

            Message::StopHw => {
                trace!("before StopHW call");
                if let Some(vendor) = &self.vendor {
                    vendor.stop_hw();
                }
                trace!("after StopHW call");
                Some((Message::StopHw, Some(ErrorCode::Success)))
            }

            Message::VersionInfo {
                progname,
                ver_major,
                ver_minor,
            } => {
                if let Some(vendor) = &self.vendor {
                    vendor.version_info(
                        progname.as_deref(),
                        ver_major.unwrap_or(-1),
                        ver_minor.unwrap_or(-1),
                    );
                }
                Some((
                    Message::VersionInfo {
                        progname: None,
                        ver_major: None,
                        ver_minor: None,
                    },
                    None,
                ))
            }

            Message::GetAttenuators { atten_idx, .. } => Some((
                match (&self.vendor, atten_idx) {
                    (None, _) => Message::error(ErrorCode::DllNotLoaded),
                    (_, None) => Message::error(ErrorCode::InvalidArgument),
                    (Some(vendor), Some(idx)) => match vendor.get_attenuators(idx) {
                        Some((result, attenuation)) => Message::GetAttenuators {
                            result: Some(result),
                            atten_idx: None,
                            attenuation: Some(attenuation),
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            Message::GetActualAttIdx { .. } => Some((
                match &self.vendor {
                    None => Message::error(ErrorCode::DllNotLoaded),
                    Some(vendor) => match vendor.get_actual_att_idx() {
                        Some(result) => Message::GetActualAttIdx {
                            result: Some(result),
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            Message::ExtIoShowMgc { agc_idx, .. } => Some((
                match (&self.vendor, agc_idx) {
                    (None, _) => Message::error(ErrorCode::DllNotLoaded),
                    (_, None) => Message::error(ErrorCode::InvalidArgument),
                    (Some(vendor), Some(idx)) => match vendor.show_mgc(idx) {
                        Some(result) => Message::ExtIoShowMgc {
                            result: Some(result),
                            agc_idx: None,
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            Message::ShowGui => self.gui_call(|v| v.show_gui()),
            Message::HideGui => self.gui_call(|v| v.hide_gui()),
            Message::SwitchGui => self.gui_call(|v| v.switch_gui()),

            Message::ExtIoGetAgcs { agc_idx, .. } => Some((
                match (&self.vendor, agc_idx) {
                    (None, _) => Message::error(ErrorCode::DllNotLoaded),
                    (_, None) => Message::error(ErrorCode::InvalidArgument),
                    (Some(vendor), Some(idx)) => match vendor.get_agcs(idx) {
                        Some((result, text)) => Message::ExtIoGetAgcs {
                            result: Some(result),
                            agc_idx: None,
                            text: Some(text),
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            Message::ExtIoGetActualAgcIdx { .. } => Some((
                match &self.vendor {
                    None => Message::error(ErrorCode::DllNotLoaded),
                    Some(vendor) => match vendor.get_actual_agc_idx() {
                        Some(result) => Message::ExtIoGetActualAgcIdx {
                            result: Some(result),
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            Message::ExtIoGetMgcs { mgc_idx, .. } => Some((
                match (&self.vendor, mgc_idx) {
                    (None, _) => Message::error(ErrorCode::DllNotLoaded),
                    (_, None) => Message::error(ErrorCode::InvalidArgument),
                    (Some(vendor), Some(idx)) => match vendor.get_mgcs(idx) {
                        Some((result, gain)) => Message::ExtIoGetMgcs {
                            result: Some(result),
                            mgc_idx: None,
                            gain: Some(gain),
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            Message::ExtIoGetActualMgcIdx { .. } => Some((
                match &self.vendor {
                    None => Message::error(ErrorCode::DllNotLoaded),
                    Some(vendor) => match vendor.get_actual_mgc_idx() {
                        Some(result) => Message::ExtIoGetActualMgcIdx {
                            result: Some(result),
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            Message::ExtIoGetSrates { srate_idx, .. } => Some((
                match (&self.vendor, srate_idx) {
                    (None, _) => Message::error(ErrorCode::DllNotLoaded),
                    (_, None) => Message::error(ErrorCode::InvalidArgument),
                    (Some(vendor), Some(idx)) => match vendor.get_srates(idx) {
                        Some((result, samplerate)) => Message::ExtIoGetSrates {
                            result: Some(result),
                            srate_idx: None,
                            samplerate: Some(samplerate),
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            Message::ExtIoGetActualSrateIdx { .. } => Some((
                match &self.vendor {
                    None => Message::error(ErrorCode::DllNotLoaded),
                    Some(vendor) => match vendor.get_actual_srate_idx() {
                        Some(result) => Message::ExtIoGetActualSrateIdx {
                            result: Some(result),
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            Message::ExtIoSetSrate { srate_idx, .. } => Some((
                match (&self.vendor, srate_idx) {
                    (None, _) => Message::error(ErrorCode::DllNotLoaded),
                    (_, None) => Message::error(ErrorCode::InvalidArgument),
                    (Some(vendor), Some(idx)) => match vendor.set_srate(idx) {
                        Some(result) => Message::ExtIoSetSrate {
                            result: Some(result),
                            srate_idx: None,
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            Message::ExtIoGetBandwidth { srate_idx, .. } => Some((
                match (&self.vendor, srate_idx) {
                    (None, _) => Message::error(ErrorCode::DllNotLoaded),
                    (_, None) => Message::error(ErrorCode::InvalidArgument),
                    (Some(vendor), Some(idx)) => match vendor.get_bandwidth(idx) {
                        Some(result) => Message::ExtIoGetBandwidth {
                            result: Some(result),
                            srate_idx: None,
                        },
                        None => Message::error(ErrorCode::NotImplemented),
                    },
                },
                None,
            )),

            other => {
                trace!(name = message_name(&other), "unexpected message");
                Some((Message::error(ErrorCode::NotImplemented), None))
            }
        };

        if let Some((msg, resultcode)) = response {
            trace!(did, response = message_name(&msg), "sending response");
            if let Err(e) = self.dialog.send_response(msg, did, resultcode).await {
                trace!(%e, "response send failed");
                return false;
            }
        }
        true
    }

    /// GUI entry points answer errors only; a successful call sends nothing
    /// back (clients fire them as notifies).
    fn gui_call(
        &self,
        call: impl FnOnce(&dyn VendorApi) -> bool,
    ) -> Option<(Message, Option<ErrorCode>)> {
        match &self.vendor {
            None => Some((Message::error(ErrorCode::DllNotLoaded), None)),
            Some(vendor) => {
                if call(vendor.as_ref()) {
                    None
                } else {
                    Some((Message::error(ErrorCode::NotImplemented), None))
                }
            }
        }
    }

    /// The whole bring-up: load the vendor, `InitHW`, install the native
    /// callback, `OpenHW` on the pump thread, then report the outcome under
    /// the request's dialog id. Returns whether the session continues.
    async fn load_extio_api(&mut self, did: i64) -> bool {
        let vendor = match (self.loader)() {
            Ok(vendor) => vendor,
            Err(e) => {
                warn!(%e, "loading ExtIO module failed");
                return false;
            }
        };

        let hw = match vendor.init_hw() {
            Ok(hw) => hw,
            Err(e) => {
                warn!(%e, "InitHW failed");
                return self.respond_load_failure(did, ErrorCode::LogicError).await;
            }
        };
        trace!(
            name = %hw.name,
            model = %hw.model,
            hw_type = hw.hw_type,
            "InitHW succeeded"
        );

        let sample = sample_size(hw.hw_type);
        let stream_tx = self.stream_tx.clone();
        let alive = self.alive.flag();
        let closure: SlotClosure = Box::new(move |cnt, status, iq_offs, iq_data| {
            if !alive.is_alive() {
                return -1;
            }
            let data = if cnt > 0 && !iq_data.is_null() {
                // Safety: the vendor guarantees `cnt * sample` bytes valid
                // for the duration of the call.
                unsafe {
                    std::slice::from_raw_parts(iq_data as *const u8, cnt as usize * sample)
                }
                .to_vec()
            } else {
                Vec::new()
            };
            if stream_tx
                .send(IqChunk {
                    cnt,
                    status,
                    iq_offs,
                    data,
                })
                .is_err()
            {
                return -1;
            }
            0
        });
        let slot = match trampoline::claim(closure) {
            Some(slot) => slot,
            None => {
                warn!("no free callback slot, rejecting LoadExtIoApi");
                return self.respond_load_failure(did, ErrorCode::LogicError).await;
            }
        };
        trace!(slot = slot.index(), "callback trampoline allocated");
        vendor.set_callback(Some(slot.native()));

        // The SDRPlay-style vendors build GUI widgets inside OpenHW and
        // need the thread that services window messages.
        let opened = {
            let vendor = vendor.clone();
            self.pump.send(move || vendor.open_hw()).unwrap_or(false)
        };
        if !opened {
            warn!("OpenHW failed");
            return self.respond_load_failure(did, ErrorCode::LogicError).await;
        }
        trace!("OpenHW succeeded");

        self.vendor = Some(vendor);
        self.hw = Some(hw);
        self.slot = Some(slot);
        self.open_ok = true;
        self.send_load_response(did, ErrorCode::Success).await
    }

    async fn respond_load_failure(&mut self, did: i64, code: ErrorCode) -> bool {
        let _ = self.send_load_response(did, code).await;
        false
    }

    async fn send_load_response(&mut self, did: i64, code: ErrorCode) -> bool {
        match self
            .dialog
            .send_response(Message::LoadExtIoApi, did, Some(code))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                trace!(%e, "LoadExtIoApi response send failed");
                false
            }
        }
    }

    fn teardown(&mut self) {
        self.driver.abort();
        if self.open_ok {
            if let Some(vendor) = &self.vendor {
                trace!("closing HW");
                vendor.close_hw();
            }
        }
        self.open_ok = false;
        self.slot = None;
        self.vendor = None;
    }
}
