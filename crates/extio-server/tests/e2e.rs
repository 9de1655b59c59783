//! End-to-end scenarios over loopback TCP: a real client shim against the
//! real acceptor/session stack, with a mock radio standing in for the
//! vendor library.

use std::ffi::{c_float, c_int, c_void};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use extio_client::{ClientConfig, HostCallback, RadioClient};
use extio_server::vendor::{HwInfo, NativeCallback, VendorApi, VendorError, VendorLoader};
use extio_server::Acceptor;
use extio_wire::hw::{hw_type, status};
use extio_wire::{ErrorCode, Message};

// ---------------------------------------------------------------------------
// Mock radio

struct MockRadio {
    has_lo64: bool,
    init_calls: AtomicUsize,
    callback: Mutex<Option<NativeCallback>>,
    last_lo: Mutex<i64>,
}

impl MockRadio {
    fn new(has_lo64: bool) -> Arc<Self> {
        Arc::new(Self {
            has_lo64,
            init_calls: AtomicUsize::new(0),
            callback: Mutex::new(None),
            last_lo: Mutex::new(0),
        })
    }

    fn loader(self: &Arc<Self>) -> VendorLoader {
        let mock = Arc::clone(self);
        Arc::new(move || -> Result<Arc<dyn VendorApi>, VendorError> {
            Ok(Arc::clone(&mock) as Arc<dyn VendorApi>)
        })
    }

    fn native_callback(&self) -> NativeCallback {
        self.callback
            .lock()
            .unwrap()
            .expect("vendor callback installed")
    }
}

impl VendorApi for MockRadio {
    fn init_hw(&self) -> Result<HwInfo, VendorError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(HwInfo {
            name: "Radio".into(),
            model: "X".into(),
            hw_type: hw_type::USB_DATA16,
        })
    }

    fn open_hw(&self) -> bool {
        true
    }

    fn close_hw(&self) {}

    fn set_callback(&self, callback: Option<NativeCallback>) {
        *self.callback.lock().unwrap() = callback;
    }

    fn start_hw(&self, _ext_lo_freq: i32) -> i32 {
        0
    }

    fn stop_hw(&self) {}

    fn set_hw_lo(&self, lo_freq: i32) -> i32 {
        *self.last_lo.lock().unwrap() = i64::from(lo_freq);
        0
    }

    fn get_hw_sr(&self) -> i32 {
        2_000_000
    }

    fn set_hw_lo64(&self, lo_freq: i64) -> Option<i64> {
        if !self.has_lo64 {
            return None;
        }
        *self.last_lo.lock().unwrap() = lo_freq;
        Some(0)
    }

    fn version_info(&self, _progname: Option<&str>, _ver_major: i32, _ver_minor: i32) -> bool {
        true
    }

    fn get_attenuators(&self, _atten_idx: i32) -> Option<(i32, f32)> {
        Some((0, 10.5))
    }

    fn get_actual_att_idx(&self) -> Option<i32> {
        Some(1)
    }

    fn show_mgc(&self, _agc_idx: i32) -> Option<i32> {
        Some(0)
    }

    fn show_gui(&self) -> bool {
        true
    }

    fn hide_gui(&self) -> bool {
        true
    }

    fn switch_gui(&self) -> bool {
        true
    }

    fn get_agcs(&self, agc_idx: i32) -> Option<(i32, String)> {
        Some((0, format!("AGC{agc_idx}")))
    }

    fn get_actual_agc_idx(&self) -> Option<i32> {
        Some(2)
    }

    fn get_mgcs(&self, _mgc_idx: i32) -> Option<(i32, f32)> {
        Some((0, 1.5))
    }

    fn get_actual_mgc_idx(&self) -> Option<i32> {
        Some(3)
    }

    fn get_srates(&self, _srate_idx: i32) -> Option<(i32, f64)> {
        Some((0, 2_048_000.0))
    }

    fn get_actual_srate_idx(&self) -> Option<i32> {
        Some(4)
    }

    fn set_srate(&self, _srate_idx: i32) -> Option<i32> {
        Some(0)
    }

    fn get_bandwidth(&self, _srate_idx: i32) -> Option<i32> {
        Some(1_536_000)
    }
}

// ---------------------------------------------------------------------------
// Test harness

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

fn start_server(port: u16, loader: VendorLoader) -> TestServer {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let (addr_tx, addr_rx) = std::sync::mpsc::sync_channel(1);
    let thread = std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let acceptor = Acceptor::bind(port, loader).await.unwrap();
            let _ = addr_tx.send(acceptor.local_addr().unwrap());
            acceptor
                .run(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });
    });
    let addr = addr_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("server bound");
    TestServer {
        addr,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    }
}

impl TestServer {
    fn port(&self) -> u16 {
        self.addr.port()
    }

    fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.thread.take() {
            let _ = join.join();
        }
    }
}

fn test_cfg(port: u16) -> ClientConfig {
    ClientConfig {
        server_addr: "127.0.0.1".into(),
        server_port: port,
        log_level: 5,
        reconnect_delay_ms: 200,
        io_timeout_ms: 2_000,
        connect_wait_ms: 2_000,
        stop_wait_ms: 2_000,
    }
}

fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// Host callback capture (one static per test, the C ABI cannot capture)

type HostEvent = (i32, i32, f32, Vec<u8>);

static STREAM_EVENTS: Mutex<Vec<HostEvent>> = Mutex::new(Vec::new());

extern "C" fn stream_host_cb(cnt: c_int, status: c_int, iq_offs: c_float, data: *mut c_void) -> c_int {
    let bytes = if cnt > 0 && !data.is_null() {
        unsafe {
            std::slice::from_raw_parts(data as *const u8, cnt as usize * 4)
        }
        .to_vec()
    } else {
        Vec::new()
    };
    STREAM_EVENTS.lock().unwrap().push((cnt, status, iq_offs, bytes));
    0
}

static RECONNECT_EVENTS: Mutex<Vec<HostEvent>> = Mutex::new(Vec::new());

extern "C" fn reconnect_host_cb(
    cnt: c_int,
    status: c_int,
    iq_offs: c_float,
    _data: *mut c_void,
) -> c_int {
    RECONNECT_EVENTS
        .lock()
        .unwrap()
        .push((cnt, status, iq_offs, Vec::new()));
    0
}

// ---------------------------------------------------------------------------
// Scenarios

#[test]
fn control_calls_round_trip_against_a_mock_radio() {
    let mock = MockRadio::new(true);
    let server = start_server(0, mock.loader());
    let client = RadioClient::new(test_cfg(server.port()));

    // Hello + LoadExtIoApi + cached InitHW.
    let init = client.init_hw().expect("init_hw");
    assert!(init.result);
    assert_eq!(init.name, "Radio");
    assert_eq!(init.model, "X");
    assert_eq!(init.hw_type, hw_type::USB_DATA16);

    // A second InitHW is served from the server-side cache.
    let again = client.init_hw().expect("cached init_hw");
    assert_eq!(again.name, "Radio");
    assert_eq!(mock.init_calls.load(Ordering::SeqCst), 1);

    // SetHWLO round trip reaches the vendor and propagates its result.
    assert_eq!(client.set_hw_lo(100_000_000), 0);
    assert_eq!(*mock.last_lo.lock().unwrap(), 100_000_000);

    assert_eq!(client.set_hw_lo64(5_000_000_000), 0);
    assert_eq!(*mock.last_lo.lock().unwrap(), 5_000_000_000);

    assert_eq!(client.get_hw_sr(), 2_000_000);
    assert_eq!(client.get_attenuators(2), (0, 10.5));
    assert_eq!(client.get_actual_att_idx(), 1);
    assert_eq!(client.show_mgc(0), 0);
    assert_eq!(client.get_agcs(1), (0, "AGC1".to_string()));
    assert_eq!(client.get_actual_agc_idx(), 2);
    assert_eq!(client.get_mgcs(0), (0, 1.5));
    assert_eq!(client.get_actual_mgc_idx(), 3);
    assert_eq!(client.get_srates(0), (0, 2_048_000.0));
    assert_eq!(client.get_actual_srate_idx(), 4);
    assert_eq!(client.set_srate(1), 0);
    assert_eq!(client.get_bandwidth(1), 1_536_000);
    assert_eq!(client.start_hw(7_100_000), 0);
    client.stop_hw();
    client.version_info("e2e-host", 1, 2);
    client.show_gui();
    client.hide_gui();
    client.switch_gui();

    // A request this server has no handler for earns NotImplemented.
    let reply = client.ping().expect("ping reply");
    assert_eq!(reply.msg, Message::error(ErrorCode::NotImplemented));

    client.stop();
    server.stop();
}

#[test]
fn set_hw_lo64_falls_back_to_32_bit_when_vendor_lacks_it() {
    let mock = MockRadio::new(false);
    let server = start_server(0, mock.loader());
    let client = RadioClient::new(test_cfg(server.port()));

    assert!(client.init_hw().is_some());
    let requested: i64 = 5_000_000_000;
    assert_eq!(client.set_hw_lo64(requested), 0);
    // Value truncated to 32-bit signed on the way into SetHWLO.
    assert_eq!(*mock.last_lo.lock().unwrap(), i64::from(requested as i32));

    client.stop();
    server.stop();
}

#[test]
fn iq_stream_reaches_the_host_callback_intact() {
    let mock = MockRadio::new(true);
    let server = start_server(0, mock.loader());
    let client = RadioClient::new(test_cfg(server.port()));

    client.set_callback(Some(stream_host_cb as HostCallback));
    assert!(client.init_hw().is_some());

    // Fire the vendor callback: 512 tuples of 4 bytes.
    let native = mock.native_callback();
    let mut samples = Vec::with_capacity(2048);
    for i in 0..2048u32 {
        samples.push((i % 251) as u8);
    }
    let rc = unsafe {
        native(
            512,
            0,
            0.0,
            samples.as_mut_ptr() as *mut c_void,
        )
    };
    assert_eq!(rc, 0);

    // And a status-only event, which carries no buffer.
    let rc = unsafe { native(-1, status::CHANGED_SAMPLERATE, 0.0, std::ptr::null_mut()) };
    assert_eq!(rc, 0);

    wait_until("iq data at host callback", || {
        let events = STREAM_EVENTS.lock().unwrap();
        events.iter().any(|(cnt, _, _, data)| *cnt == 512 && data == &samples)
            && events
                .iter()
                .any(|(cnt, st, _, _)| *cnt == -1 && *st == status::CHANGED_SAMPLERATE)
    });

    client.stop();
    server.stop();
}

#[test]
fn server_death_notifies_host_then_reconnects() {
    let mock = MockRadio::new(true);
    let server = start_server(0, mock.loader());
    let port = server.port();

    let client = RadioClient::new(test_cfg(port));
    client.set_callback(Some(reconnect_host_cb as HostCallback));
    assert!(client.init_hw().is_some());

    // Kill the server under an established session.
    server.stop();

    wait_until("stop + disconnected host notifications", || {
        let events = RECONNECT_EVENTS.lock().unwrap();
        let stop = events
            .iter()
            .position(|(cnt, st, _, _)| *cnt == -1 && *st == status::STOP);
        let gone = events
            .iter()
            .position(|(cnt, st, _, _)| *cnt == -1 && *st == status::DISCONNECTED);
        matches!((stop, gone), (Some(a), Some(b)) if a < b)
    });

    // Bring the server back on the same port; the client re-handshakes on
    // its own after the backoff delay.
    let mock2 = MockRadio::new(true);
    let server = start_server(port, mock2.loader());
    wait_until("client reconnected", || client.get_hw_sr() == 2_000_000);

    // No ready/running synthesized on reconnect; the host restarts itself.
    {
        let events = RECONNECT_EVENTS.lock().unwrap();
        assert!(!events.iter().any(|(_, st, _, _)| *st == status::READY
            || *st == status::RUNNING
            || *st == status::START));
    }
    assert_eq!(client.start_hw(7_100_000), 0);

    client.stop();
    server.stop();
}
