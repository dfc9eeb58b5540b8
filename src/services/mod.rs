// Services module
pub mod bridge_service;
pub mod config_service;
pub mod known_hosts;
pub mod mysql_service;
pub mod ssh_service;
pub mod transport;
