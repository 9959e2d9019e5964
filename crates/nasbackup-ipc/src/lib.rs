//! NAS Backup IPC - inbound commands and outbound broadcasts
//!
//! Clients talk to the daemon over the D-Bus session bus. Every method call
//! becomes a [`gateway::Command`] handled by the single command gateway task,
//! and every controller event is re-emitted as a D-Bus signal.
//!
//! # Interface
//! - `org.nasbackup.Backup1` at `/org/nasbackup/Backup`

pub mod gateway;
pub mod service;

#[cfg(test)]
mod testing;
