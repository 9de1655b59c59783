//! Server side of ExtIoOverNet.
//!
//! Loads a vendor ExtIO dynamic library and exposes it over TCP. The
//! [`acceptor`] owns the listener and a registry of live sessions; each
//! [`session::ServerSession`] runs on its own single-threaded runtime so
//! that every vendor call comes from one OS thread, with [`pump`] providing
//! the extra thread some vendors require for `OpenHW`. The process-wide
//! [`trampoline`] table bridges the vendor's bare C callback pointer back to
//! the owning session.

pub mod acceptor;
pub mod pump;
pub mod session;
pub mod trampoline;
pub mod vendor;

pub use acceptor::Acceptor;
pub use session::ServerSession;
pub use vendor::{ExtIoDll, HwInfo, NativeCallback, VendorApi, VendorError, VendorLoader};

/// Name announced to clients in the `Hello` exchange.
pub const SERVER_NAME: &str = "ExtIO_TCP_server";

/// Default TCP port listened on for client connections.
pub const DEFAULT_PORT: u16 = 2056;
