//! ExtIO hardware constants shared by client and server.
//!
//! Values mirror the published ExtIO header so they can cross the C ABI
//! unchanged.

/// Hardware data types reported by the vendor's `InitHW`. The value decides
/// the IQ sample-tuple encoding on the stream.
pub mod hw_type {
    pub const NONE: i32 = 0;
    pub const SDR14: i32 = 1;
    pub const SDRX: i32 = 2;
    /// 16-bit signed IQ over USB.
    pub const USB_DATA16: i32 = 3;
    pub const SC_DATA: i32 = 4;
    /// 24-bit signed IQ over USB.
    pub const USB_DATA24: i32 = 5;
    /// 32-bit signed IQ over USB.
    pub const USB_DATA32: i32 = 6;
    /// 32-bit float IQ over USB.
    pub const USB_FLOAT32: i32 = 7;
    pub const HPSDR: i32 = 8;
    /// 8-bit unsigned IQ.
    pub const USB_DATA_U8: i32 = 9;
    /// 8-bit signed IQ.
    pub const USB_DATA_S8: i32 = 10;
    /// 32-bit PCM.
    pub const FULL_PCM32: i32 = 11;
}

/// Status codes passed through the ExtIO callback's `status` argument.
pub mod status {
    pub const DISCONNECTED: i32 = 0;
    pub const READY: i32 = 1;
    pub const RUNNING: i32 = 2;
    pub const ERROR: i32 = 3;
    pub const OK: i32 = 4;
    pub const CHANGED_SAMPLERATE: i32 = 100;
    pub const CHANGED_LO: i32 = 101;
    pub const LOCK_LO: i32 = 102;
    pub const UNLOCK_LO: i32 = 103;
    pub const CHANGED_LO_NOT_TUNE: i32 = 104;
    pub const CHANGED_TUNE: i32 = 105;
    pub const CHANGED_MODE: i32 = 106;
    pub const START: i32 = 107;
    pub const STOP: i32 = 108;
    pub const CHANGED_FILTER: i32 = 109;
}

/// Size in bytes of one IQ sample tuple for a hardware data type.
///
/// Unknown types fall back to the smallest tuple rather than panicking; the
/// vendor owns the value and a wrong guess only mis-sizes logging.
pub fn sample_size(hw_type: i32) -> usize {
    match hw_type {
        hw_type::USB_DATA16 => 4,
        hw_type::USB_DATA24 => 6,
        hw_type::FULL_PCM32 | hw_type::USB_DATA32 | hw_type::USB_FLOAT32 => 8,
        hw_type::USB_DATA_U8 | hw_type::USB_DATA_S8 => 2,
        _ => 2,
    }
}
