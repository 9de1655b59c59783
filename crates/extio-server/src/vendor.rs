//! The vendor ExtIO dynamic library binding.
//!
//! The library is loaded at runtime with `libloading`, one instance per
//! session. Entry points the ExtIO specification marks optional are held as
//! `Option<Symbol>`; the [`VendorApi`] trait is the seam the session
//! dispatches through, so tests substitute a mock radio.

use std::ffi::{c_char, c_float, c_int, c_long, c_void, CString};

use libloading::{Library, Symbol};
use tracing::info;

/// The callback signature the vendor library accepts: a bare C function
/// pointer with no user-data argument.
pub type NativeCallback =
    unsafe extern "C" fn(cnt: c_int, status: c_int, iq_offs: c_float, iq_data: *mut c_void) -> c_int;

/// What the vendor's `InitHW` reports; cached for the session's lifetime.
#[derive(Debug, Clone, Default)]
pub struct HwInfo {
    pub name: String,
    pub model: String,
    pub hw_type: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum VendorError {
    #[error("failed to load ExtIO library {path}: {source}")]
    LoadFailed {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("ExtIO library {path} is missing required symbol {symbol}")]
    MissingSymbol { path: String, symbol: &'static str },

    #[error("vendor InitHW failed")]
    InitFailed,
}

/// Factory producing a fresh vendor instance per session.
pub type VendorLoader =
    std::sync::Arc<dyn Fn() -> Result<std::sync::Arc<dyn VendorApi>, VendorError> + Send + Sync>;

/// The subset of the ExtIO API the server forwards.
///
/// Methods returning `Option` model optional entry points: `None` means the
/// vendor does not export the symbol and the caller answers
/// `NotImplemented`.
pub trait VendorApi: Send + Sync {
    fn init_hw(&self) -> Result<HwInfo, VendorError>;
    fn open_hw(&self) -> bool;
    fn close_hw(&self);
    fn set_callback(&self, callback: Option<NativeCallback>);
    fn start_hw(&self, ext_lo_freq: i32) -> i32;
    fn stop_hw(&self);
    fn set_hw_lo(&self, lo_freq: i32) -> i32;
    fn get_hw_sr(&self) -> i32;

    fn set_hw_lo64(&self, lo_freq: i64) -> Option<i64>;
    /// Returns false when the vendor does not export `VersionInfo`.
    fn version_info(&self, progname: Option<&str>, ver_major: i32, ver_minor: i32) -> bool;
    fn get_attenuators(&self, atten_idx: i32) -> Option<(i32, f32)>;
    fn get_actual_att_idx(&self) -> Option<i32>;
    fn show_mgc(&self, agc_idx: i32) -> Option<i32>;
    fn show_gui(&self) -> bool;
    fn hide_gui(&self) -> bool;
    fn switch_gui(&self) -> bool;
    fn get_agcs(&self, agc_idx: i32) -> Option<(i32, String)>;
    fn get_actual_agc_idx(&self) -> Option<i32>;
    fn get_mgcs(&self, mgc_idx: i32) -> Option<(i32, f32)>;
    fn get_actual_mgc_idx(&self) -> Option<i32>;
    fn get_srates(&self, srate_idx: i32) -> Option<(i32, f64)>;
    fn get_actual_srate_idx(&self) -> Option<i32>;
    fn set_srate(&self, srate_idx: i32) -> Option<i32>;
    fn get_bandwidth(&self, srate_idx: i32) -> Option<i32>;
}

type FnInitHw = unsafe extern "C" fn(*mut c_char, *mut c_char, *mut c_int) -> bool;
type FnOpenHw = unsafe extern "C" fn() -> bool;
type FnVoid = unsafe extern "C" fn();
type FnSetCallback = unsafe extern "C" fn(Option<NativeCallback>);
type FnStartHw = unsafe extern "C" fn(c_long) -> c_int;
type FnSetHwLo = unsafe extern "C" fn(c_long) -> c_int;
type FnSetHwLo64 = unsafe extern "C" fn(i64) -> i64;
type FnGetHwSr = unsafe extern "C" fn() -> c_long;
type FnVersionInfo = unsafe extern "C" fn(*const c_char, c_int, c_int);
type FnGetAttenuators = unsafe extern "C" fn(c_int, *mut c_float) -> c_int;
type FnGetIdx = unsafe extern "C" fn() -> c_int;
type FnIdxArg = unsafe extern "C" fn(c_int) -> c_int;
type FnGetAgcs = unsafe extern "C" fn(c_int, *mut c_char) -> c_int;
type FnGetMgcs = unsafe extern "C" fn(c_int, *mut c_float) -> c_int;
type FnGetSrates = unsafe extern "C" fn(c_int, *mut f64) -> c_int;
type FnGetBandwidth = unsafe extern "C" fn(c_int) -> c_long;

/// A loaded vendor library and its resolved entry points.
pub struct ExtIoDll {
    init_hw: Symbol<'static, FnInitHw>,
    open_hw: Symbol<'static, FnOpenHw>,
    close_hw: Symbol<'static, FnVoid>,
    set_callback: Symbol<'static, FnSetCallback>,
    start_hw: Symbol<'static, FnStartHw>,
    stop_hw: Symbol<'static, FnVoid>,
    set_hw_lo: Symbol<'static, FnSetHwLo>,
    get_hw_sr: Symbol<'static, FnGetHwSr>,

    set_hw_lo64: Option<Symbol<'static, FnSetHwLo64>>,
    version_info: Option<Symbol<'static, FnVersionInfo>>,
    get_attenuators: Option<Symbol<'static, FnGetAttenuators>>,
    get_actual_att_idx: Option<Symbol<'static, FnGetIdx>>,
    show_mgc: Option<Symbol<'static, FnIdxArg>>,
    show_gui: Option<Symbol<'static, FnVoid>>,
    hide_gui: Option<Symbol<'static, FnVoid>>,
    switch_gui: Option<Symbol<'static, FnVoid>>,
    get_agcs: Option<Symbol<'static, FnGetAgcs>>,
    get_actual_agc_idx: Option<Symbol<'static, FnGetIdx>>,
    get_mgcs: Option<Symbol<'static, FnGetMgcs>>,
    get_actual_mgc_idx: Option<Symbol<'static, FnGetIdx>>,
    get_srates: Option<Symbol<'static, FnGetSrates>>,
    get_actual_srate_idx: Option<Symbol<'static, FnGetIdx>>,
    set_srate: Option<Symbol<'static, FnIdxArg>>,
    get_bandwidth: Option<Symbol<'static, FnGetBandwidth>>,

    _lib: Library,
}

unsafe fn required<T>(
    lib: &'static Library,
    path: &str,
    symbol: &'static str,
) -> Result<Symbol<'static, T>, VendorError> {
    lib.get(symbol.as_bytes())
        .map_err(|_| VendorError::MissingSymbol {
            path: path.into(),
            symbol,
        })
}

unsafe fn optional<T>(lib: &'static Library, symbol: &str) -> Option<Symbol<'static, T>> {
    lib.get(symbol.as_bytes()).ok()
}

impl ExtIoDll {
    pub fn load(path: &str) -> Result<Self, VendorError> {
        let lib = unsafe { Library::new(path) }.map_err(|source| VendorError::LoadFailed {
            path: path.into(),
            source,
        })?;

        // Safety: the symbols never outlive the Library stored alongside
        // them in this struct.
        let lib_ref: &'static Library = unsafe { std::mem::transmute(&lib) };

        let dll = unsafe {
            ExtIoDll {
                init_hw: required(lib_ref, path, "InitHW")?,
                open_hw: required(lib_ref, path, "OpenHW")?,
                close_hw: required(lib_ref, path, "CloseHW")?,
                set_callback: required(lib_ref, path, "SetCallback")?,
                start_hw: required(lib_ref, path, "StartHW")?,
                stop_hw: required(lib_ref, path, "StopHW")?,
                set_hw_lo: required(lib_ref, path, "SetHWLO")?,
                get_hw_sr: required(lib_ref, path, "GetHWSR")?,

                set_hw_lo64: optional(lib_ref, "SetHWLO64"),
                version_info: optional(lib_ref, "VersionInfo"),
                get_attenuators: optional(lib_ref, "GetAttenuators"),
                get_actual_att_idx: optional(lib_ref, "GetActualAttIdx"),
                show_mgc: optional(lib_ref, "ExtIoShowMGC"),
                show_gui: optional(lib_ref, "ShowGUI"),
                hide_gui: optional(lib_ref, "HideGUI"),
                switch_gui: optional(lib_ref, "SwitchGUI"),
                get_agcs: optional(lib_ref, "ExtIoGetAGCs"),
                get_actual_agc_idx: optional(lib_ref, "ExtIoGetActualAGCidx"),
                get_mgcs: optional(lib_ref, "ExtIoGetMGCs"),
                get_actual_mgc_idx: optional(lib_ref, "ExtIoGetActualMgcIdx"),
                get_srates: optional(lib_ref, "ExtIoGetSrates"),
                get_actual_srate_idx: optional(lib_ref, "ExtIoGetActualSrateIdx"),
                set_srate: optional(lib_ref, "ExtIoSetSrate"),
                get_bandwidth: optional(lib_ref, "ExtIoGetBandwidth"),

                _lib: lib,
            }
        };
        info!(path, "loaded ExtIO library");
        Ok(dll)
    }
}

fn c_buf_to_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

impl VendorApi for ExtIoDll {
    fn init_hw(&self) -> Result<HwInfo, VendorError> {
        let mut name = [0u8; 128];
        let mut model = [0u8; 128];
        let mut hw_type: c_int = 0;
        let ok = unsafe {
            (self.init_hw)(
                name.as_mut_ptr() as *mut c_char,
                model.as_mut_ptr() as *mut c_char,
                &mut hw_type,
            )
        };
        if !ok {
            return Err(VendorError::InitFailed);
        }
        Ok(HwInfo {
            name: c_buf_to_string(&name),
            model: c_buf_to_string(&model),
            hw_type,
        })
    }

    fn open_hw(&self) -> bool {
        unsafe { (self.open_hw)() }
    }

    fn close_hw(&self) {
        unsafe { (self.close_hw)() }
    }

    fn set_callback(&self, callback: Option<NativeCallback>) {
        unsafe { (self.set_callback)(callback) }
    }

    fn start_hw(&self, ext_lo_freq: i32) -> i32 {
        unsafe { (self.start_hw)(ext_lo_freq as c_long) }
    }

    fn stop_hw(&self) {
        unsafe { (self.stop_hw)() }
    }

    fn set_hw_lo(&self, lo_freq: i32) -> i32 {
        unsafe { (self.set_hw_lo)(lo_freq as c_long) }
    }

    fn get_hw_sr(&self) -> i32 {
        unsafe { (self.get_hw_sr)() as i32 }
    }

    fn set_hw_lo64(&self, lo_freq: i64) -> Option<i64> {
        let f = self.set_hw_lo64.as_ref()?;
        Some(unsafe { f(lo_freq) })
    }

    fn version_info(&self, progname: Option<&str>, ver_major: i32, ver_minor: i32) -> bool {
        let Some(f) = self.version_info.as_ref() else {
            return false;
        };
        let progname = progname.and_then(|s| CString::new(s).ok());
        let ptr = progname
            .as_ref()
            .map(|c| c.as_ptr())
            .unwrap_or(std::ptr::null());
        unsafe { f(ptr, ver_major, ver_minor) };
        true
    }

    fn get_attenuators(&self, atten_idx: i32) -> Option<(i32, f32)> {
        let f = self.get_attenuators.as_ref()?;
        let mut attenuation: c_float = 0.0;
        let result = unsafe { f(atten_idx, &mut attenuation) };
        Some((result, attenuation))
    }

    fn get_actual_att_idx(&self) -> Option<i32> {
        let f = self.get_actual_att_idx.as_ref()?;
        Some(unsafe { f() })
    }

    fn show_mgc(&self, agc_idx: i32) -> Option<i32> {
        let f = self.show_mgc.as_ref()?;
        Some(unsafe { f(agc_idx) })
    }

    fn show_gui(&self) -> bool {
        match self.show_gui.as_ref() {
            Some(f) => {
                unsafe { f() };
                true
            }
            None => false,
        }
    }

    fn hide_gui(&self) -> bool {
        match self.hide_gui.as_ref() {
            Some(f) => {
                unsafe { f() };
                true
            }
            None => false,
        }
    }

    fn switch_gui(&self) -> bool {
        match self.switch_gui.as_ref() {
            Some(f) => {
                unsafe { f() };
                true
            }
            None => false,
        }
    }

    fn get_agcs(&self, agc_idx: i32) -> Option<(i32, String)> {
        let f = self.get_agcs.as_ref()?;
        let mut text = [0u8; 128];
        let result = unsafe { f(agc_idx, text.as_mut_ptr() as *mut c_char) };
        Some((result, c_buf_to_string(&text)))
    }

    fn get_actual_agc_idx(&self) -> Option<i32> {
        let f = self.get_actual_agc_idx.as_ref()?;
        Some(unsafe { f() })
    }

    fn get_mgcs(&self, mgc_idx: i32) -> Option<(i32, f32)> {
        let f = self.get_mgcs.as_ref()?;
        let mut gain: c_float = 0.0;
        let result = unsafe { f(mgc_idx, &mut gain) };
        Some((result, gain))
    }

    fn get_actual_mgc_idx(&self) -> Option<i32> {
        let f = self.get_actual_mgc_idx.as_ref()?;
        Some(unsafe { f() })
    }

    fn get_srates(&self, srate_idx: i32) -> Option<(i32, f64)> {
        let f = self.get_srates.as_ref()?;
        let mut samplerate: f64 = 0.0;
        let result = unsafe { f(srate_idx, &mut samplerate) };
        Some((result, samplerate))
    }

    fn get_actual_srate_idx(&self) -> Option<i32> {
        let f = self.get_actual_srate_idx.as_ref()?;
        Some(unsafe { f() })
    }

    fn set_srate(&self, srate_idx: i32) -> Option<i32> {
        let f = self.set_srate.as_ref()?;
        Some(unsafe { f(srate_idx) })
    }

    fn get_bandwidth(&self, srate_idx: i32) -> Option<i32> {
        let f = self.get_bandwidth.as_ref()?;
        Some(unsafe { f(srate_idx) as i32 })
    }
}
