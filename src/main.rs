//! `virtualpad-server` — binary entry point.
//!
//! Parses [`Config`] from CLI flags/environment, builds the platform
//! [`VirtualDeviceFactory`], starts the [`Supervisor`], and runs until
//! `SIGINT`/`SIGTERM`.

use anyhow::Result;
use clap::Parser;
use hawa_virtualpad::device::VirtualDeviceFactory;
use hawa_virtualpad::{Config, Supervisor};

#[cfg(target_os = "linux")]
fn device_factory() -> Box<dyn VirtualDeviceFactory> {
    Box::new(hawa_virtualpad::device::LinuxDeviceFactory)
}

#[cfg(not(target_os = "linux"))]
fn device_factory() -> Box<dyn VirtualDeviceFactory> {
    log::warn!("[main] no uinput backend on this platform, using the in-memory recording device");
    Box::new(hawa_virtualpad::device::RecordingDeviceFactory)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("[main] failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = Config::parse();
    log::info!(
        "[main] starting: pad_port={} broadcast_port={} admin_socket={}",
        config.pad_port,
        config.broadcast_port,
        config.admin_socket_path.display()
    );

    let supervisor = Supervisor::start(config, device_factory()).await?;

    wait_for_shutdown_signal().await;
    log::info!("[main] shutdown signal received");

    supervisor.shutdown().await;
    Ok(())
}
