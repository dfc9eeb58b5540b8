use clap::Parser;
use mysql_via_ssh::cli::{self, Cli};
use mysql_via_ssh::utils::logger;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logger
    match cli.log_level.as_deref() {
        Some(level) => logger::init_with_level(level),
        None => logger::init(),
    }

    tracing::info!("mysql-via-ssh starting with config {:?}", cli.config);

    let mut stdout = std::io::stdout();
    if let Err(e) = cli::run(&cli, &mut stdout).await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}
