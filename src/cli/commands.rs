use crate::services::config_service::ConfigService;
use crate::services::mysql_service::DEFAULT_QUERY;
use clap::Parser;
use std::path::PathBuf;

/// Query a MySQL database that is only reachable through an SSH bastion
#[derive(Parser, Debug)]
#[command(name = "mysql-via-ssh")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, default_value_os_t = ConfigService::default_config_path())]
    pub config: PathBuf,

    /// Statement to run; it must return an integer `id` and a text `name` column
    #[arg(short, long, default_value = DEFAULT_QUERY)]
    pub query: String,

    /// Log level for this tool (RUST_LOG takes over when unset)
    #[arg(long)]
    pub log_level: Option<String>,
}
