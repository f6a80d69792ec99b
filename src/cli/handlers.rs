use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    app::{
        batch::{run_batch, BatchRequest, SelectionTracker},
        poller::StatusPoller,
        AppFactory, FragmentSearchRequest, LocalBackend, SearchBackend, SearchRequest,
    },
    mgf,
    semantic::BroadIndexStatus,
    spectrum::DetectedPeak,
    web,
};

use super::SpectrumArgs;

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn handle_daemon() -> Result<()> {
    let service = AppFactory::create_service()?;
    let listen = service.config().listen.clone();
    let backend: Arc<dyn SearchBackend> = Arc::new(LocalBackend::new(service));

    web::start_daemon(backend, &listen).await
}

pub async fn handle_libraries(backend: Arc<dyn SearchBackend>) -> Result<()> {
    print_json(&backend.libraries().await?)
}

pub async fn handle_entries(
    backend: Arc<dyn SearchBackend>,
    library: String,
    entry: Option<String>,
) -> Result<()> {
    match entry {
        Some(entry) => print_json(&backend.entry(library, entry).await?),
        None => print_json(&backend.entries(library).await?),
    }
}

pub struct SearchOptions {
    pub broad: bool,
    pub library: Option<String>,
    pub top_n: Option<usize>,
    pub fragment: bool,
    pub tolerance: Option<f64>,
    pub compare: bool,
}

pub async fn handle_search(
    backend: Arc<dyn SearchBackend>,
    spectrum: &SpectrumArgs,
    opts: SearchOptions,
) -> Result<()> {
    let spectrum = spectrum.load()?;

    if opts.fragment || opts.compare {
        let request = FragmentSearchRequest {
            peaks: spectrum.peaks,
            precursor_mz: spectrum.precursor_mz,
            tolerance: opts.tolerance,
            top_n: opts.top_n,
            library_id: opts.library,
        };
        if opts.compare {
            return print_json(&backend.compare(request).await?);
        }
        return print_json(&backend.search_fragment(request).await?);
    }

    let request = SearchRequest {
        peaks: spectrum.peaks,
        top_n: opts.top_n,
        library_id: opts.library,
    };
    let results = if opts.broad {
        backend.search_broad(request).await?
    } else {
        backend.search_embedding(request).await?
    };

    print_json(&results)
}

/// Every spectrum of the file becomes one detected peak, named after the
/// spectrum or its position.
fn detected_peaks(path: &Path) -> Result<Vec<DetectedPeak>> {
    let records =
        mgf::read_mgf(path).with_context(|| format!("failed to read {}", path.display()))?;

    Ok(records
        .iter()
        .enumerate()
        .map(|(i, record)| DetectedPeak {
            id: record
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("peak-{i}")),
            spectrum: record.to_spectrum(),
        })
        .collect())
}

pub async fn handle_batch(
    backend: Arc<dyn SearchBackend>,
    mgf_path: &Path,
    request: BatchRequest,
) -> Result<()> {
    let peaks = detected_peaks(mgf_path)?;
    log::info!("searching {} peaks from {}", peaks.len(), mgf_path.display());

    let tracker = SelectionTracker::new();
    let selection = tracker.select();

    let partial = run_batch(backend, peaks, request, &tracker, selection, |outcome| {
        match serde_json::to_string(outcome) {
            Ok(line) => println!("{line}"),
            Err(err) => log::error!("failed to serialize outcome: {err}"),
        }
    })
    .await;

    let Some(partial) = partial else {
        return Ok(());
    };
    if let Some(status) = partial.index_unavailable() {
        bail!("broad index is not ready ({status:?}), run build-index first");
    }
    if partial.is_empty() {
        eprintln!("{} holds no spectra", mgf_path.display());
        return Ok(());
    }

    let matched = partial
        .iter()
        .filter(|(_, results)| !results.is_empty())
        .count();
    eprintln!("{matched} of {} peaks matched", partial.len());
    if partial.had_errors() {
        eprintln!(
            "{} of {} peaks could not be searched",
            partial.error_count(),
            partial.len()
        );
    }

    Ok(())
}

pub async fn handle_build_index(backend: Arc<dyn SearchBackend>) -> Result<()> {
    let interval = Duration::from_millis(backend.config().await?.broad_index.poll_interval_ms);

    let status = backend.build_broad_index().await?;
    match status {
        BroadIndexStatus::Error { message } => bail!("broad index build failed: {message}"),
        BroadIndexStatus::Ready { .. } => return print_json(&status),
        _ => {}
    }

    let bar = ProgressBar::new(100);
    bar.set_style(ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% {msg}",
    )?);

    let poller = StatusPoller::spawn(backend, interval);
    let mut receiver = poller.subscribe();
    let display = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let current = receiver.borrow_and_update().clone();
                if let Some(BroadIndexStatus::Building { progress, message }) = current {
                    bar.set_position(progress as u64);
                    bar.set_message(message);
                }
            }
        })
    };

    let last = poller.wait_terminal().await;
    poller.stop();
    display.abort();

    match last {
        Some(BroadIndexStatus::Ready { count }) => {
            bar.set_position(100);
            bar.finish_with_message(format!("ready, {count} spectra"));
        }
        Some(BroadIndexStatus::Error { message }) => {
            bar.abandon_with_message(format!("failed: {message}"));
            bail!("broad index build failed: {message}");
        }
        _ => {
            bar.abandon();
            bail!("stopped following the broad index build before it finished");
        }
    }

    Ok(())
}

pub fn handle_vectorize(spectrum: &SpectrumArgs) -> Result<()> {
    let service = AppFactory::create_service()?;
    let spectrum = spectrum.load()?;

    print_json(&service.vectorize(&spectrum.peaks))
}
