//! Serves a fixed number of virtual game controllers on a Linux host to
//! remote clients over the network: a slot manager, a binary pad
//! protocol engine, a JSON-lines broadcast fan-out, and a Unix-socket
//! admin channel, wired together by a [`Supervisor`].

pub mod admin;
pub mod broadcast;
pub mod config;
pub mod device;
pub mod error;
pub mod notification;
pub mod pad;
pub mod password_store;
pub mod slot;
pub mod slot_manager;
pub mod supervisor;

pub use config::Config;
pub use error::PadError;
pub use slot_manager::SlotManager;
pub use supervisor::Supervisor;
