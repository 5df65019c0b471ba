//! Connection plumbing: registry, rooms, fan-out and the hub that ties them
//! to live sockets.

pub mod dispatch;
pub mod handler;
pub mod registry;
pub mod rooms;
pub mod service;
pub mod types;
pub mod upgrade;
