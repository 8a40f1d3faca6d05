//! sftp-pool-probe - check a server through the pool
//!
//! Usage: `sftp-pool-probe <host> <port> <username> [path]`
//!
//! The password comes from `SFTP_PROBE_PASSWORD`, or a private key path from
//! `SFTP_PROBE_KEY` (passphrase in `SFTP_PROBE_KEY_PASSPHRASE`). Pool limits
//! come from the usual `SFTP_*` variables.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use sftp_pool::{
    init_logging, ConnectTarget, ConnectionPool, Credentials, FileOperations, ListOptions,
    PoolConfig, RusshConnector, SftpPoolError, TransferLimits,
};
use tracing::{error, info};

const PROBE_TENANT: &str = "probe";

fn credentials_from_env() -> Result<Credentials, SftpPoolError> {
    if let Ok(key_path) = std::env::var("SFTP_PROBE_KEY") {
        return Ok(Credentials::KeyFile {
            key_path: PathBuf::from(key_path),
            passphrase: std::env::var("SFTP_PROBE_KEY_PASSPHRASE").ok(),
        });
    }
    std::env::var("SFTP_PROBE_PASSWORD")
        .map(Credentials::password)
        .map_err(|_| {
            SftpPoolError::configuration(
                "Set SFTP_PROBE_PASSWORD or SFTP_PROBE_KEY",
                "credentials",
            )
        })
}

async fn run(args: &[String]) -> Result<(), SftpPoolError> {
    let (host, port, username) = match args {
        [host, port, username, ..] => (host, port, username),
        _ => {
            return Err(SftpPoolError::configuration(
                "usage: sftp-pool-probe <host> <port> <username> [path]",
                "arguments",
            ))
        }
    };
    let port: u16 = port
        .parse()
        .map_err(|_| SftpPoolError::configuration(format!("Invalid port: {}", port), "port"))?;
    let path = args.get(3).map(String::as_str).unwrap_or(".");
    let credentials = credentials_from_env()?;

    let config = PoolConfig::from_env();
    let limits = TransferLimits::from_config(&config);
    let pool = ConnectionPool::builder(Arc::new(RusshConnector::new()))
        .config(config)
        .build();
    let options = pool.default_options();
    let files = FileOperations::new(limits);

    let result = async {
        let session = pool
            .acquire(
                PROBE_TENANT,
                ConnectTarget::new(host.as_str(), port, username.as_str()),
                &credentials,
                &options,
            )
            .await?;

        let (ok, message) = files.test_connection(&session, Some(path)).await;
        if !ok {
            return Err(SftpPoolError::connection(message.unwrap_or_default()));
        }

        let entries = files
            .list_directory(&session, path, &ListOptions::default().include_dirs(true))
            .await?;
        info!("{} entries in {}", entries.len(), path);
        for entry in &entries {
            println!(
                "{:>10}  {:<9}  {}",
                entry.size,
                if entry.is_dir() { "directory" } else { "file" },
                entry.relative_path
            );
        }
        Ok::<(), SftpPoolError>(())
    }
    .await;

    match serde_json::to_string_pretty(&pool.stats()) {
        Ok(stats) => println!("{}", stats),
        Err(e) => error!("Failed to serialize pool stats: {}", e),
    }
    pool.stop().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            e.log();
            eprintln!("{}", e.format_for_user());
            ExitCode::FAILURE
        }
    }
}
