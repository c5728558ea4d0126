//! Driveup - upload matching files from a local directory to Google Drive

mod cli;
mod config;
mod drive;
mod error;
mod mime;
mod oauth;
mod pattern;
mod scanner;
mod uploader;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::Cli;
use crate::config::{ClientSecrets, DriveAuthType, GlobalConfig};
use crate::drive::{DriveClient, RemoteStorage};
use crate::oauth::{OAuthManager, ServiceAccountAuthenticator};
use crate::scanner::ScanRequest;
use crate::uploader::{UploadPlan, UploadReport, Uploader};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        eprintln!("\nError: {:#}", e);
        eprintln!("\nUse 'driveup --help' for usage information.");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if cli.logout {
        let config = load_config(&cli)?;
        // Revoking needs only the stored token, not the client credentials.
        let oauth = OAuthManager::new(config.oauth_credentials().unwrap_or_default());
        let was_logged_in = oauth.is_authenticated();
        oauth.logout().await?;
        if was_logged_in {
            println!("Logged out from Google Drive.");
        } else {
            println!("No stored Google Drive login.");
        }
        return Ok(());
    }

    let read_dir = cli
        .read_dir
        .clone()
        .context("--read-dir is required")?;
    let scan = ScanRequest::new(read_dir)
        .with_recursive(cli.recursive)
        .with_pattern(cli.pattern.clone())
        .with_follow_links(cli.follow_links);

    if cli.dry_run {
        let mut count = 0;
        for record in scanner::scan(&scan)? {
            println!("{}", record.absolute_path().display());
            count += 1;
        }
        info!("{} file(s) would be uploaded", count);
        return Ok(());
    }

    // Loading may write a default config file; a dry run leaves no trace.
    let config = load_config(&cli)?;

    let plan = UploadPlan {
        scan,
        upload_folder: cli.upload_dir.clone(),
        create_dated_folder: cli.create_folder,
        dated_folder_format: config.settings.dated_folder_format.clone(),
        direct_upload: !(cli.resumable || config.settings.resumable_upload),
    };

    info!("Application started");
    let report = match config.drive.auth_type {
        DriveAuthType::OAuth => {
            let oauth = OAuthManager::new(config.oauth_credentials()?);
            upload(DriveClient::new(oauth), &plan).await?
        }
        DriveAuthType::ServiceAccount => {
            if config.drive.service_account_file.is_empty() {
                anyhow::bail!("auth_type is service_account but no service_account_file is set");
            }
            let auth = ServiceAccountAuthenticator::new(&config.drive.service_account_file);
            upload(DriveClient::new(auth), &plan).await?
        }
    };

    print_report(&report);
    info!("Application finished");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<GlobalConfig> {
    let mut config = match &cli.config {
        Some(path) => GlobalConfig::load_from(path),
        None => GlobalConfig::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(path) = &cli.client_secrets {
        let secrets = ClientSecrets::load(path)?;
        config.apply_client_secrets(&secrets);
    }

    Ok(config)
}

async fn upload<S: RemoteStorage>(storage: S, plan: &UploadPlan) -> Result<UploadReport> {
    Ok(Uploader::new(storage).run(plan).await?)
}

fn print_report(report: &UploadReport) {
    println!();
    println!(
        "Destination: {}",
        report.destination.as_deref().unwrap_or("My Drive (root)")
    );
    println!(
        "{} file(s) processed, {} uploaded, {} failed",
        report.total(),
        report.uploaded.len(),
        report.failed.len()
    );

    if !report.uploaded.is_empty() {
        println!();
        println!("{:<60} {:<28} {}", "File", "MIME type", "Drive ID");
        println!("{}", "-".repeat(110));
        for file in &report.uploaded {
            println!(
                "{:<60} {:<28} {}",
                file.path.display(),
                file.mime_type,
                file.remote_id
            );
        }
    }

    for failure in &report.failed {
        eprintln!("Failed: {} ({})", failure.path.display(), failure.error);
    }
}
