//! Query a MySQL server that is only reachable from an SSH bastion.
//!
//! [`SecureTunnel`](services::ssh_service::SecureTunnel) holds one
//! authenticated SSH connection and dials `direct-tcpip` channels over it.
//! Registered in a [`TransportRegistry`](services::transport::TransportRegistry),
//! it becomes the transport a
//! [`TunneledDatabase`](services::mysql_service::TunneledDatabase) connects
//! through.

pub mod cli;
pub mod models;
pub mod services;
pub mod utils;
