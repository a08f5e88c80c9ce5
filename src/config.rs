use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use reqwest::Url;
use serde::Deserialize;

use crate::layout::viewport::{MAX_ZOOM, MIN_ZOOM, Zoom};

/// Full-viewer layout and sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ViewerSettings {
    /// Zoom applied when a viewer mounts (clamped to 1.0..=4.0).
    pub default_zoom: f32,
    /// Horizontal space reserved around landscape pages, in px.
    pub landscape_padding_px: f32,
    /// Vertical gap between consecutive pages, in px.
    pub page_gap_px: f32,
    /// Space above the first and below the last page, in px.
    pub column_padding_px: f32,
}

impl ViewerSettings {
    const fn default_zoom() -> f32 {
        1.8
    }

    const fn default_landscape_padding_px() -> f32 {
        80.0
    }

    const fn default_page_gap_px() -> f32 {
        32.0
    }

    const fn default_column_padding_px() -> f32 {
        32.0
    }

    pub fn zoom(&self) -> Zoom {
        Zoom::new(self.default_zoom)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            (MIN_ZOOM..=MAX_ZOOM).contains(&self.default_zoom),
            "default-zoom must be between {MIN_ZOOM} and {MAX_ZOOM}"
        );
        ensure!(
            self.landscape_padding_px.is_finite() && self.landscape_padding_px >= 0.0,
            "landscape-padding-px must be zero or positive"
        );
        ensure!(
            self.page_gap_px.is_finite() && self.page_gap_px >= 0.0,
            "page-gap-px must be zero or positive"
        );
        ensure!(
            self.column_padding_px.is_finite() && self.column_padding_px >= 0.0,
            "column-padding-px must be zero or positive"
        );
        Ok(())
    }
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            default_zoom: Self::default_zoom(),
            landscape_padding_px: Self::default_landscape_padding_px(),
            page_gap_px: Self::default_page_gap_px(),
            column_padding_px: Self::default_column_padding_px(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ThumbnailSettings {
    /// Fixed render scale; not subject to the zoom clamp.
    pub scale: f32,
    /// Default number of leading pages rendered per thumbnail set.
    pub max_pages: usize,
}

impl ThumbnailSettings {
    const fn default_scale() -> f32 {
        1.5
    }

    const fn default_max_pages() -> usize {
        5
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.scale.is_finite() && self.scale > 0.0,
            "thumbnails.scale must be positive"
        );
        Ok(())
    }
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            scale: Self::default_scale(),
            max_pages: Self::default_max_pages(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Download proxy; documents are requested as `<proxy-url>?url=<source>`.
    pub proxy_url: Option<String>,
    /// Whole-request timeout for document downloads.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Option<Duration>,
    pub viewer: ViewerSettings,
    pub thumbnails: ThumbnailSettings,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    pub fn validated(self) -> Result<Self> {
        self.proxy().context("invalid proxy-url")?;
        if let Some(timeout) = self.fetch_timeout {
            ensure!(!timeout.is_zero(), "fetch-timeout must be greater than zero");
        }
        self.viewer
            .validate()
            .context("invalid viewer configuration")?;
        self.thumbnails
            .validate()
            .context("invalid thumbnails configuration")?;
        Ok(self)
    }

    /// Parsed `proxy-url`, if one is configured.
    pub fn proxy(&self) -> Result<Option<Url>> {
        self.proxy_url
            .as_deref()
            .map(|raw| {
                let url = Url::parse(raw).with_context(|| format!("cannot parse {raw:?}"))?;
                ensure!(
                    matches!(url.scheme(), "http" | "https"),
                    "proxy-url must be http or https"
                );
                Ok(url)
            })
            .transpose()
    }
}
