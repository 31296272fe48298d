//! Presence service integration: payload construction and the IPC client.

pub mod discord_ipc;
pub mod presence_publisher;
