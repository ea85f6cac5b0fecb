//! Top-level object that owns the three servers, wires the `Notifier`
//! references together, runs the heartbeat sweep, and serializes the
//! pad server's start/stop lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::admin::{AdminServer, PadServerControl};
use crate::broadcast::BroadcastServer;
use crate::config::Config;
use crate::device::VirtualDeviceFactory;
use crate::notification::Notifier;
use crate::pad::PadServer;
use crate::password_store::PasswordStore;
use crate::slot_manager::SlotManager;

/// Implements [`PadServerControl`] for the admin server by holding the
/// pad server behind a mutex so `server:start`/`server:stop` can swap it
/// in and out without the admin server knowing how one is constructed.
#[derive(Debug)]
struct PadServerHandle {
    addr: SocketAddr,
    heartbeat_interval: std::time::Duration,
    slots: Arc<SlotManager>,
    notifier: Arc<dyn Notifier>,
    current: Mutex<Option<PadServer>>,
}

#[async_trait::async_trait]
impl PadServerControl for PadServerHandle {
    async fn start(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        if current.is_some() {
            return Ok(());
        }
        let server = PadServer::start(
            self.addr,
            self.slots.clone(),
            self.notifier.clone(),
            self.heartbeat_interval,
        )
        .await
        .context("failed to start pad server")?;
        *current = Some(server);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        if let Some(server) = current.take() {
            server.stop(&self.slots).await;
        }
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.current.lock().await.is_some()
    }
}

/// Owns every long-lived component and runs until an unrecoverable
/// startup error or an external shutdown signal.
pub struct Supervisor {
    config: Arc<Config>,
    slots: Arc<SlotManager>,
    broadcast: BroadcastServer,
    admin: AdminServer,
    pad_control: Arc<PadServerHandle>,
}

impl Supervisor {
    /// Wires every component together and starts accepting connections on
    /// all three sockets, auto-starting the pad server the way the
    /// reference implementation's `server_activate` does.
    pub async fn start(config: Config, device_factory: Box<dyn VirtualDeviceFactory>) -> Result<Self> {
        let config = Arc::new(config);

        let passwords = PasswordStore::new(config.password_file.clone(), config.slot_count);
        let slots = Arc::new(SlotManager::new(
            config.slot_count,
            passwords,
            device_factory,
            config.slot_cooldown(),
        ));

        let broadcast_addr: SocketAddr = format!("0.0.0.0:{}", config.broadcast_port)
            .parse()
            .context("invalid broadcast address")?;
        let broadcast = BroadcastServer::start(broadcast_addr)
            .await
            .context("failed to start broadcast server")?;
        let notifier: Arc<dyn Notifier> = Arc::new(broadcast.notifier());

        let pad_addr: SocketAddr = format!("0.0.0.0:{}", config.pad_port)
            .parse()
            .context("invalid pad address")?;
        let pad_control = Arc::new(PadServerHandle {
            addr: pad_addr,
            heartbeat_interval: config.heartbeat_interval(),
            slots: slots.clone(),
            notifier: notifier.clone(),
            current: Mutex::new(None),
        });
        // The pad-serving socket is up from boot, mirroring the reference
        // main server's `server_activate`; an admin `server:stop`/`server:start`
        // pair can still cycle it later.
        pad_control.start().await.context("failed to start pad server")?;

        let admin = AdminServer::start(
            config.admin_socket_path.clone(),
            &config.admin_group,
            slots.clone(),
            notifier.clone(),
            pad_control.clone() as Arc<dyn PadServerControl>,
        )
        .await
        .context("failed to start admin server")?;

        tokio::spawn(Self::heartbeat_sweep(slots.clone(), config.heartbeat_sweep_interval()));

        log::info!("[Supervisor] started");

        Ok(Self {
            config,
            slots,
            broadcast,
            admin,
            pad_control,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn slots(&self) -> &Arc<SlotManager> {
        &self.slots
    }

    /// Runs the 1s-by-default `SlotManager::heartbeat()` sweep for the
    /// life of the process.
    async fn heartbeat_sweep(slots: Arc<SlotManager>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let expired = slots.heartbeat().await;
            for (index, did_expire) in expired.into_iter().enumerate() {
                if did_expire {
                    log::info!("[Supervisor] slot {index} cooldown expired, now empty");
                }
            }
        }
    }

    /// Stops every component in turn: the pad server (force-releasing all
    /// slots), the broadcast server (sentinel to every observer), then
    /// the admin socket itself.
    pub async fn shutdown(self) {
        let _ = self.pad_control.stop().await;
        self.broadcast.close().await;
        self.admin.shutdown();
        log::info!("[Supervisor] shut down");
    }
}
