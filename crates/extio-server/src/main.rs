//! ExtIO software-radio API propagation over the network, server side.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, trace};

use extio_server::vendor::{ExtIoDll, VendorApi, VendorLoader};
use extio_server::{Acceptor, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(
    name = "extio-server",
    about = "ExtIO software radio API propagation over network"
)]
struct Args {
    /// ExtIO API dynamic library to be propagated over the network.
    #[arg(long = "extio_path")]
    extio_path: String,

    /// Port number listened on for client connections.
    #[arg(long = "listening_port", default_value_t = DEFAULT_PORT)]
    listening_port: u16,

    /// Logging level: trace=0, debug=1, info=2, warning=3, error=4, off=5.
    #[arg(long = "log_level", default_value_t = 4)]
    log_level: u8,
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
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received, stopping");
}

async fn run(args: Args) -> std::io::Result<()> {
    let path = args.extio_path.clone();
    let loader: VendorLoader = Arc::new(move || {
        ExtIoDll::load(&path).map(|dll| Arc::new(dll) as Arc<dyn VendorApi>)
    });

    let acceptor = Acceptor::bind(args.listening_port, loader).await?;
    acceptor.run(shutdown_signal()).await;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level);

    info!("ExtIoOverNet server starting");
    trace!(extio_path = %args.extio_path, "option");
    trace!(listening_port = args.listening_port, "option");
    trace!(log_level = args.log_level, "option");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(%e, "failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => {
            info!("exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(%e, "fatal initialization failure");
            ExitCode::FAILURE
        }
    }
}
