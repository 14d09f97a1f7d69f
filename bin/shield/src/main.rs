//! # Shield Binary
//!
//! The entry point that assembles the moderation service from compile-time
//! plugin features and runtime settings, then runs one operator command.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use secrecy::ExposeSecret;
use shield_config::{LogFormat, Settings};
use shield_core::records::Records;
use shield_core::traits::Notifier;
use shield_engine::{ScanMode, ScanPolicy, ShieldService};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(feature = "store-json")]
use shield_store_json::JsonFileStore;

#[cfg(feature = "directory-roblox")]
use shield_directory_roblox::{DirectoryOptions, RobloxDirectory};

#[cfg(feature = "notify-webhook")]
use shield_notify_webhook::{LogNotifier, WebhookNotifier};

#[cfg(feature = "auth-simple")]
use shield_auth_simple::SimpleAccessProvider;

#[cfg(not(all(
    feature = "store-json",
    feature = "directory-roblox",
    feature = "notify-webhook",
    feature = "auth-simple"
)))]
compile_error!("shield needs one store, directory, notifier and auth plugin enabled");

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,shield=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    // stdout carries command output; logs go to stderr.
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn assemble(settings: &Settings) -> anyhow::Result<(ShieldService, Option<JoinHandle<()>>)> {
    // 1. Record store
    let store = JsonFileStore::open(&settings.data_dir)
        .await
        .context("failed to open data directory")?;
    let records = Arc::new(Records::new(Arc::new(store)));

    // 2. Group directory
    let directory = RobloxDirectory::new(DirectoryOptions {
        base_url: settings.directory.base_url.clone(),
        page_size: settings.directory.page_size,
        timeout: settings.directory.timeout(),
    })
    .context("failed to build directory client")?;

    // 3. Notifications
    let (notifier, delivery): (Arc<dyn Notifier>, _) = match &settings.notify.webhook_url {
        Some(url) => {
            let (notifier, handle) = WebhookNotifier::spawn(
                url.expose_secret().to_string(),
                settings.notify.queue_capacity,
                Duration::from_secs(settings.notify.timeout_secs),
            );
            (Arc::new(notifier), Some(handle))
        }
        None => (Arc::new(LogNotifier), None),
    };

    let scan = ScanPolicy {
        mode: match settings.scan.mode {
            shield_config::ScanMode::Inline => ScanMode::Inline,
            shield_config::ScanMode::Detached => ScanMode::Detached,
        },
        timeout: Duration::from_secs(settings.scan.timeout_secs),
        concurrency: settings.scan.concurrency,
    };

    let service = ShieldService::new(
        records,
        Arc::new(directory),
        notifier,
        Arc::new(SimpleAccessProvider::new()),
        scan,
    );
    Ok((service, delivery))
}

async fn seed_reviewers(service: &ShieldService, settings: &Settings) -> anyhow::Result<()> {
    let named = settings
        .reviewers
        .iter()
        .map(|seed| (seed.name.clone(), seed.passcode.expose_secret().to_string()));
    let bare = settings
        .reviewer_passwords
        .iter()
        .enumerate()
        .map(|(i, passcode)| (format!("reviewer-{}", i + 1), passcode.expose_secret().to_string()));

    for (name, passcode) in named.chain(bare) {
        if service.ensure_reviewer(&name, &passcode).await? {
            tracing::info!(reviewer = %name, "seeded reviewer");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let settings = Settings::load().context("failed to load configuration")?;
    init_tracing(settings.log_format);

    let (service, delivery) = assemble(&settings).await?;
    seed_reviewers(&service, &settings).await?;

    let result = cli::run(cli.command, &service, cli.passcode.as_deref()).await;

    // Closing the last notifier handle lets the delivery task drain and exit.
    drop(service);
    if let Some(handle) = delivery {
        let grace = Duration::from_secs(settings.notify.timeout_secs);
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!("pending notifications abandoned at exit");
        }
    }
    result
}
