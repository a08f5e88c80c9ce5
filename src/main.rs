use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use folio_render::config::Configuration;
use folio_render::engine::engine_ready;
use folio_render::engine::image::ImageEngine;
use folio_render::events::Phase;
use folio_render::fetch::HttpFetcher;
use folio_render::layout::column::ContainerSize;
use folio_render::render::queue::RenderQueue;
use folio_render::render::session::DocumentLoader;
use folio_render::render::surface::Surface;
use folio_render::tasks::controller::{Callback, Services};
use folio_render::tasks::thumbnails::{self, ThumbnailProps};
use folio_render::tasks::viewer::{self, ViewerProps};

#[derive(Debug, Parser)]
#[command(
    name = "folio-render",
    version,
    about = "headless paginated-document renderer"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Increase log verbosity (repeatable); RUST_LOG takes precedence
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render the leading pages of a document as thumbnails
    Thumbnails {
        /// Document URL or local path
        url: String,
        /// Display name used for output files
        #[arg(long)]
        name: Option<String>,
        /// Override thumbnails.max-pages
        #[arg(long, value_name = "N")]
        max_pages: Option<usize>,
        /// Directory receiving one PNG per thumbnail
        #[arg(long, value_name = "DIR", default_value = ".")]
        out: PathBuf,
    },
    /// Render every page the way the full viewer lays them out
    View {
        /// Document URL or local path
        url: String,
        /// Override viewer.default-zoom
        #[arg(long)]
        zoom: Option<f32>,
        /// Container width in px
        #[arg(long, default_value_t = 1280.0)]
        width: f32,
        /// Container height in px
        #[arg(long, default_value_t = 900.0)]
        height: f32,
        /// Page to navigate to once rendered
        #[arg(long)]
        page: Option<usize>,
        /// Directory receiving one PNG per page
        #[arg(long, value_name = "DIR", default_value = ".")]
        out: PathBuf,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("folio_render={level},warn"))),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        verbose,
        command,
    } = Args::parse();
    init_tracing(verbose);

    let cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::debug!("loaded configuration from {}:\n{:#?}", config.display(), cfg);

    let fetcher = HttpFetcher::new(cfg.proxy()?, cfg.fetch_timeout)
        .context("failed to build HTTP client")?;
    let (engine_init, engine) = engine_ready();
    engine_init.ready(Arc::new(ImageEngine::new()));

    let queue = RenderQueue::new();
    let cancel = CancellationToken::new();
    let worker = queue.spawn(cancel.clone());
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let services = Services::new(queue, DocumentLoader::new(Arc::new(fetcher), engine));
    let started = Instant::now();
    let result = match command {
        Command::Thumbnails {
            url,
            name,
            max_pages,
            out,
        } => run_thumbnails(&services, &cfg, &cancel, url, name, max_pages, &out).await,
        Command::View {
            url,
            zoom,
            width,
            height,
            page,
            out,
        } => {
            let container = ContainerSize::new(width, height);
            run_view(&services, &cfg, &cancel, url, zoom, container, page, &out).await
        }
    };

    cancel.cancel();
    if let Err(err) = worker.await {
        tracing::warn!("render queue task failed: {err}");
    }
    let elapsed = Duration::from_millis(started.elapsed().as_millis() as u64);
    tracing::info!("finished in {}", humantime::format_duration(elapsed));
    result
}

async fn run_thumbnails(
    services: &Services,
    cfg: &Configuration,
    cancel: &CancellationToken,
    url: String,
    name: Option<String>,
    max_pages: Option<usize>,
    out: &Path,
) -> Result<()> {
    let file_url = normalize_source(&url)?;
    let file_name = name.unwrap_or_else(|| display_name(&file_url));
    let on_click: Callback = Arc::new(|| tracing::info!("thumbnail clicked"));
    let set = thumbnails::mount(
        services,
        &cfg.thumbnails,
        ThumbnailProps {
            file_url,
            file_name: file_name.clone(),
            max_pages,
        },
        on_click,
        None,
    );

    let state = tokio::select! {
        _ = cancel.cancelled() => None,
        state = set.settled() => state,
    };
    set.unmount().await;
    let Some(state) = state else {
        bail!("interrupted before thumbnails were ready");
    };
    if let Phase::Failed { message } = &state.phase {
        bail!("{file_name}: {message}");
    }

    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("failed to create {}", out.display()))?;
    for slot in &state.slots {
        match slot.png() {
            Some(png) => {
                let path = out.join(format!("{}-thumb-{}.png", file_stem(&file_name), slot.page));
                tokio::fs::write(&path, png)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!(page = slot.page, "wrote {}", path.display());
            }
            None => tracing::warn!(page = slot.page, view = ?slot.view, "thumbnail unavailable"),
        }
    }
    tracing::info!(
        pages = ?state.page_count,
        rendered = state.rendered(),
        unavailable = state.unavailable(),
        "thumbnails done"
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_view(
    services: &Services,
    cfg: &Configuration,
    cancel: &CancellationToken,
    url: String,
    zoom: Option<f32>,
    container: ContainerSize,
    page: Option<usize>,
    out: &Path,
) -> Result<()> {
    let file_url = normalize_source(&url)?;
    let file_name = display_name(&file_url);
    let on_close: Callback = Arc::new(|| tracing::info!("viewer closed"));
    let mut settings = cfg.viewer.clone();
    if let Some(zoom) = zoom {
        settings.default_zoom = zoom;
    }
    let viewer = viewer::mount(
        services,
        &settings,
        ViewerProps {
            file_url,
            file_name: file_name.clone(),
        },
        on_close,
    );
    viewer.attach(container).await;

    let state = tokio::select! {
        _ = cancel.cancelled() => None,
        state = viewer.wait_until(|s| s.phase.is_settled()) => state,
    };
    let state = match (state, page) {
        (Some(state), Some(page)) if state.phase == Phase::Ready => {
            viewer.go_to(page).await;
            let page = page.clamp(1, state.page_count.unwrap_or(1));
            viewer.wait_until(|s| s.current_page == page).await
        }
        (state, _) => state,
    };
    viewer.unmount().await;
    let Some(state) = state else {
        bail!("interrupted before the viewer was ready");
    };
    if let Phase::Failed { message } = &state.phase {
        bail!("{file_name}: {message}");
    }

    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("failed to create {}", out.display()))?;
    for page in &state.pages {
        let path = out.join(format!("{}-page-{}.png", file_stem(&file_name), page.page));
        if write_surface(&page.surface, &path).await? {
            tracing::info!(page = page.page, "wrote {}", path.display());
        } else {
            tracing::warn!(page = page.page, view = ?page.view, "page unavailable");
        }
    }
    tracing::info!(
        zoom = state.zoom.percent(),
        page = %state.indicator(),
        scroll_top = state.scroll_top,
        "viewer done"
    );
    Ok(())
}

async fn write_surface(surface: &Surface, path: &Path) -> Result<bool> {
    let Some(snapshot) = surface.snapshot() else {
        return Ok(false);
    };
    let png = snapshot.to_png().context("failed to encode PNG")?;
    tokio::fs::write(path, png)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

/// Accepts absolute URLs as-is and turns local paths into `file://` URLs.
fn normalize_source(raw: &str) -> Result<String> {
    if let Ok(url) = Url::parse(raw) {
        if url.scheme().len() > 1 {
            return Ok(url.into());
        }
    }
    let path = std::fs::canonicalize(raw).with_context(|| format!("cannot resolve {raw}"))?;
    let url = Url::from_file_path(&path)
        .map_err(|_| anyhow::anyhow!("cannot express {} as a URL", path.display()))?;
    Ok(url.into())
}

fn display_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}
