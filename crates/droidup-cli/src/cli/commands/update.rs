//! `droidup update <app>` – run the update pipeline for one app.

use anyhow::{Context, Result};
use droidup_core::adb::Adb;
use droidup_core::apps::App;
use droidup_core::cache::{MetadataCache, SystemClock};
use droidup_core::config::DroidupConfig;
use droidup_core::disk;
use droidup_core::download::curl::CurlDownloadService;
use droidup_core::download::{DownloadOrchestrator, DownloadService};
use droidup_core::fetch::RemoteMetadataSource;
use droidup_core::fingerprint::{FingerprintVerifier, SignerSource};
use droidup_core::installed::InstalledReleases;
use droidup_core::pipeline::{
    PipelineDeps, PipelineOptions, PipelineState, UpdatePipeline, UpdateRequest,
};
use droidup_core::release::ReleaseId;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use url::Url;

use super::open_store;

#[derive(Debug)]
pub struct UpdateArgs {
    pub app: App,
    pub url: Option<String>,
    pub release: Option<String>,
    pub yes: bool,
}

pub(crate) fn build_request(args: &UpdateArgs) -> Result<UpdateRequest> {
    let mut request = UpdateRequest::new(args.app);
    if let Some(raw) = &args.url {
        let url = Url::parse(raw).with_context(|| format!("invalid download URL '{}'", raw))?;
        request = request.with_download_url(url);
    }
    if let Some(raw) = &args.release {
        let release = ReleaseId::parse(args.app.release_id_kind(), raw)
            .with_context(|| format!("invalid release id '{}' for {}", raw, args.app))?;
        request = request.with_release_id(release);
    }
    Ok(request)
}

pub async fn run_update(cfg: &DroidupConfig, args: UpdateArgs) -> Result<()> {
    let app = args.app;
    let request = build_request(&args)?;

    let download_dir = cfg.resolved_download_dir()?;
    if let Some(free) = disk::warn_if_low(&download_dir, cfg.min_free_bytes) {
        if free < cfg.min_free_bytes {
            eprintln!(
                "warning: only {} MiB free in {}",
                free / (1024 * 1024),
                download_dir.display()
            );
        }
    }

    let store = open_store().await?;
    let adb = Arc::new(Adb::new(&cfg.adb.clone().unwrap_or_default()));
    let downloads: Arc<dyn DownloadService> = Arc::new(CurlDownloadService::new(download_dir));
    let signers: Arc<dyn SignerSource> = adb.clone();
    let deps = PipelineDeps {
        cache: MetadataCache::with_clock(Arc::clone(&store), Arc::new(SystemClock), cfg.cache_ttl()),
        installed: InstalledReleases::new(store),
        source: Arc::new(RemoteMetadataSource::new(cfg.fetch_timeout())),
        downloads: DownloadOrchestrator::new(downloads),
        verifier: FingerprintVerifier::new(signers),
        installer: adb,
    };

    let pipeline = UpdatePipeline::new(deps, PipelineOptions::from(cfg));
    let mut handle = pipeline.start(request);
    loop {
        let state = tokio::select! {
            state = handle.next_state() => state,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupted, cancelling");
                handle.cancel();
                break;
            }
        };
        let Some(state) = state else { break };
        println!("[{}] {}", app.key(), state);

        if state == PipelineState::AwaitingInstallConfirmation {
            let confirmed = if args.yes {
                true
            } else {
                match answer_or_interrupt(ask_to_install(app), tokio::signal::ctrl_c()).await? {
                    Some(answer) => answer,
                    None => {
                        eprintln!("\ninterrupted, cancelling");
                        handle.cancel();
                        break;
                    }
                }
            };
            if confirmed {
                handle.confirm_install();
            } else {
                handle.decline_install();
            }
        }
        if state.is_terminal() {
            break;
        }
    }

    let outcome = handle.join().await?;
    if outcome.succeeded() {
        println!("{} is updated and its signature verified", app.title());
        Ok(())
    } else {
        anyhow::bail!("update of {} ended: {}", app, outcome.final_state)
    }
}

async fn ask_to_install(app: App) -> Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("Install {} on the device? [y/N] ", app.title()).as_bytes())
        .await?;
    stdout.flush().await?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    Ok(is_yes(&line))
}

/// The prompt's answer, or `None` if `interrupt` fires first.
async fn answer_or_interrupt<I>(
    prompt: impl Future<Output = Result<bool>>,
    interrupt: I,
) -> Result<Option<bool>>
where
    I: Future,
{
    tokio::select! {
        answer = prompt => answer.map(Some),
        _ = interrupt => Ok(None),
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
