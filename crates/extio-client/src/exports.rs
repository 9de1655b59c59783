//! The ExtIO C ABI re-exported to the host SDR application.
//!
//! Entry points follow the published ExtIO conventions: `-1` on failure for
//! integer returns, `false` for bool, no-op for void. The shared client is
//! created lazily on the first entry, reading the colocated config file and
//! initializing logging once.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_float, c_int, c_long, CStr};
use std::sync::OnceLock;

use tracing::info;

use extio_wire::hw::hw_type;

use crate::client::RadioClient;
use crate::config::ClientConfig;
use crate::HostCallback;

static CLIENT: OnceLock<RadioClient> = OnceLock::new();

fn client() -> &'static RadioClient {
    CLIENT.get_or_init(|| {
        let cfg = ClientConfig::load_default();
        init_logging(cfg.log_level);
        info!(
            server_addr = %cfg.server_addr,
            server_port = cfg.server_port,
            log_level = cfg.log_level,
            "ExtIoOverNet client starting"
        );
        RadioClient::new(cfg)
    })
}

fn init_logging(level: u8) {
    let filter = match level {
        0 => "trace",
        1 => "debug",
        2 => "info",
        3 => "warn",
        4 => "error",
        _ => "off",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Copy at most `max` bytes of `src` into the C buffer plus a NUL.
///
/// # Safety
/// `dst` must be null or valid for `max + 1` bytes.
unsafe fn copy_c_string(dst: *mut c_char, src: &str, max: usize) {
    if dst.is_null() {
        return;
    }
    let bytes = src.as_bytes();
    let len = bytes.len().min(max);
    std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, dst, len);
    *dst.add(len) = 0;
}

/// # Safety
/// `name` and `model` must be null or ExtIO-sized C buffers (64 and 16
/// bytes); `hwtype` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn InitHW(name: *mut c_char, model: *mut c_char, hwtype: *mut c_int) -> bool {
    // Identify the shim even before the server answers.
    copy_c_string(name, "ExtIoOverNet", 63);
    copy_c_string(model, "ExtIoOverNet", 15);
    if !hwtype.is_null() {
        *hwtype = hw_type::USB_DATA16;
    }

    let Some(init) = client().init_hw() else {
        return false;
    };
    copy_c_string(name, &init.name, 63);
    copy_c_string(model, &init.model, 15);
    if !hwtype.is_null() {
        *hwtype = init.hw_type;
    }
    init.result
}

#[no_mangle]
pub extern "C" fn OpenHW() -> bool {
    client().open_hw()
}

#[no_mangle]
pub extern "C" fn CloseHW() {
    client().stop();
}

#[no_mangle]
pub extern "C" fn StartHW(lo_freq: c_long) -> c_int {
    client().start_hw(lo_freq as i32)
}

#[no_mangle]
pub extern "C" fn StopHW() {
    client().stop_hw();
}

#[no_mangle]
pub extern "C" fn SetCallback(funcptr: Option<HostCallback>) {
    client().set_callback(funcptr);
}

#[no_mangle]
pub extern "C" fn SetHWLO(lo_freq: c_long) -> c_int {
    client().set_hw_lo(lo_freq as i32)
}

#[no_mangle]
pub extern "C" fn SetHWLO64(lo_freq: i64) -> i64 {
    client().set_hw_lo64(lo_freq)
}

#[no_mangle]
pub extern "C" fn GetHWSR() -> c_long {
    client().get_hw_sr() as c_long
}

/// # Safety
/// `progname` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn VersionInfo(progname: *const c_char, ver_major: c_int, ver_minor: c_int) {
    let progname = if progname.is_null() {
        String::new()
    } else {
        CStr::from_ptr(progname).to_string_lossy().into_owned()
    };
    client().version_info(&progname, ver_major, ver_minor);
}

/// # Safety
/// `attenuation` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn GetAttenuators(atten_idx: c_int, attenuation: *mut c_float) -> c_int {
    let (result, value) = client().get_attenuators(atten_idx);
    if !attenuation.is_null() {
        *attenuation = value;
    }
    result
}

#[no_mangle]
pub extern "C" fn GetActualAttIdx() -> c_int {
    client().get_actual_att_idx()
}

#[no_mangle]
pub extern "C" fn ExtIoShowMGC(agc_idx: c_int) -> c_int {
    client().show_mgc(agc_idx)
}

#[no_mangle]
pub extern "C" fn ShowGUI() {
    client().show_gui();
}

#[no_mangle]
pub extern "C" fn HideGUI() {
    client().hide_gui();
}

#[no_mangle]
pub extern "C" fn SwitchGUI() {
    client().switch_gui();
}

/// # Safety
/// `text` must be null or an ExtIO AGC-name buffer.
#[no_mangle]
pub unsafe extern "C" fn ExtIoGetAGCs(agc_idx: c_int, text: *mut c_char) -> c_int {
    let (result, name) = client().get_agcs(agc_idx);
    copy_c_string(text, &name, 63);
    result
}

#[no_mangle]
pub extern "C" fn ExtIoGetActualAGCidx() -> c_int {
    client().get_actual_agc_idx()
}

/// # Safety
/// `gain` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn ExtIoGetMGCs(mgc_idx: c_int, gain: *mut c_float) -> c_int {
    let (result, value) = client().get_mgcs(mgc_idx);
    if !gain.is_null() {
        *gain = value;
    }
    result
}

#[no_mangle]
pub extern "C" fn ExtIoGetActualMgcIdx() -> c_int {
    client().get_actual_mgc_idx()
}

/// # Safety
/// `samplerate` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn ExtIoGetSrates(srate_idx: c_int, samplerate: *mut f64) -> c_int {
    let (result, value) = client().get_srates(srate_idx);
    if !samplerate.is_null() {
        *samplerate = value;
    }
    result
}

#[no_mangle]
pub extern "C" fn ExtIoGetActualSrateIdx() -> c_int {
    client().get_actual_srate_idx()
}

#[no_mangle]
pub extern "C" fn ExtIoSetSrate(srate_idx: c_int) -> c_int {
    client().set_srate(srate_idx)
}

#[no_mangle]
pub extern "C" fn ExtIoGetBandwidth(srate_idx: c_int) -> c_long {
    client().get_bandwidth(srate_idx) as c_long
}
