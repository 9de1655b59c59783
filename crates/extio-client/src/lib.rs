//! Client-side ExtIO shim.
//!
//! Presents the synchronous ExtIO API to a host SDR application and carries
//! every call over TCP to the server that owns the radio. The async session
//! actor in [`session`] is the canonical core; [`client::RadioClient`] is
//! the thin blocking layer the facade entry points in [`exports`] sit on.

use std::ffi::{c_float, c_int, c_void};

pub mod client;
pub mod config;
pub mod exports;
mod session;

pub use client::{HwInit, RadioClient};
pub use config::{ClientConfig, CLIENT_CONFIG_FILE};

/// The host application's sample/status callback, as defined by the ExtIO
/// ABI: `(cnt, status, iq_offs, iq_data)`. `iq_data` is borrowed for the
/// duration of the call.
pub type HostCallback =
    unsafe extern "C" fn(cnt: c_int, status: c_int, iq_offs: c_float, iq_data: *mut c_void) -> c_int;

/// Name this shim announces in the `Hello` exchange.
pub const CLIENT_NAME: &str = "ExtIO_TCP_client";
