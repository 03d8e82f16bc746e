//! Badge rendering and export engine for event check-in stations.
//!
//! The pipeline runs template resolution (with an offline fallback ladder),
//! token substitution, adaptive text sizing, deterministic vector rendering,
//! rasterization, and PDF assembly. [`BadgePress`] is the facade most hosts
//! want; the individual stages are public for callers that need only one of
//! them.
//!
//! ```no_run
//! use badgepress::{AttendeeBinding, BadgePress};
//!
//! # async fn demo() -> Result<(), badgepress::BadgePressError> {
//! let press = BadgePress::builder()
//!     .font_dir("./fonts")
//!     .dpi(300)
//!     .build()?;
//! let attendee = AttendeeBinding {
//!     uuid: "u-1".into(),
//!     full_name: "Ada Lovelace".into(),
//!     ..Default::default()
//! };
//! let cancel = tokio_util::sync::CancellationToken::new();
//! let (artifact, summary) = press.export("ev-1", &[attendee], &cancel).await?;
//! assert_eq!(summary.pages, artifact.pages);
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod canvas;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod font;
pub mod import;
pub mod pdf;
pub mod raster;
pub mod render;
pub mod sizing;
pub mod store;
pub mod template;
pub mod types;

pub use binding::{mentions_token, substitute, AttendeeBinding};
pub use canvas::{Canvas, Command, ImageFit, Page, RenderedDocument};
pub use diagnostics::DiagnosticsLogger;
pub use error::BadgePressError;
pub use export::{
    dispatch, BadgeSink, ExportArtifact, ExportSummary, ExportTarget, Exporter, PageFailure,
};
pub use font::FontRegistry;
pub use import::{
    run_import, AttendeeGateway, GuestCheck, GuestDirectory, GuestType, HeaderMap,
    HttpAttendeeGateway, HttpGuestDirectory, ImportOutcome, ImportRecord, NormalizedRow, RowError,
    RowIntent, SAMPLE_HEADER_ROW,
};
pub use raster::{rasterize, RasterPage};
pub use render::Renderer;
pub use sizing::{
    fit, ApproxMeasurer, FieldRole, FitOutcome, FitPolicy, FitPolicySet, RegistryMeasurer,
    TextMeasurer,
};
pub use store::{
    HttpAttendeeSource, HttpTemplateStore, ResolvedTemplate, TemplateCache, TemplateOrigin,
    TemplateResolver, TemplateSource,
};
pub use template::{
    default_template, BadgeTemplate, Element, ElementFrame, FitMode, ImageElement, ShapeElement,
    ShapeType, Side, Sides, TemplateStatus, TextAlign, TextElement,
};
pub use types::{Color, Pt, Size};

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Configures and builds a [`BadgePress`].
pub struct BadgePressBuilder {
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    dpi: u32,
    page_mm: (f32, f32),
    policies: FitPolicySet,
    cache_dir: Option<PathBuf>,
    diagnostics_path: Option<PathBuf>,
    template_source: Option<Arc<dyn TemplateSource>>,
    template_service_url: Option<String>,
}

impl Default for BadgePressBuilder {
    fn default() -> Self {
        Self {
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            dpi: 300,
            page_mm: (100.0, 100.0),
            policies: FitPolicySet::default(),
            cache_dir: None,
            diagnostics_path: None,
            template_source: None,
            template_service_url: None,
        }
    }
}

impl BadgePressBuilder {
    pub fn font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn page_size_mm(mut self, width_mm: f32, height_mm: f32) -> Self {
        self.page_mm = (width_mm, height_mm);
        self
    }

    pub fn fit_policies(mut self, policies: FitPolicySet) -> Self {
        self.policies = policies;
        self
    }

    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    pub fn diagnostics_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.diagnostics_path = Some(path.into());
        self
    }

    pub fn template_source(mut self, source: Arc<dyn TemplateSource>) -> Self {
        self.template_source = Some(source);
        self
    }

    pub fn template_service_url(mut self, url: impl Into<String>) -> Self {
        self.template_service_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<BadgePress, BadgePressError> {
        if self.dpi == 0 || self.dpi > 2400 {
            return Err(BadgePressError::InvalidConfiguration(format!(
                "dpi {} out of range (1..=2400)",
                self.dpi
            )));
        }
        let (width_mm, height_mm) = self.page_mm;
        if width_mm <= 0.0 || height_mm <= 0.0 {
            return Err(BadgePressError::InvalidConfiguration(format!(
                "page size {width_mm}x{height_mm}mm is not printable"
            )));
        }
        let page_size = Size::from_mm(width_mm, height_mm);

        let mut registry = FontRegistry::new();
        for dir in &self.font_dirs {
            registry.register_dir(dir);
        }
        for file in &self.font_files {
            registry.register_file(file);
        }
        let registry = Arc::new(registry);

        let diagnostics = match &self.diagnostics_path {
            Some(path) => Some(DiagnosticsLogger::new(path)?),
            None => None,
        };

        let source: Option<Arc<dyn TemplateSource>> = match (self.template_source, self.template_service_url) {
            (Some(source), _) => Some(source),
            (None, Some(url)) => Some(Arc::new(HttpTemplateStore::new(url)?)),
            (None, None) => None,
        };
        let cache = self.cache_dir.map(TemplateCache::new);
        let resolver = TemplateResolver::new(source, cache, diagnostics.clone());

        let measurer: Arc<dyn TextMeasurer> = Arc::new(RegistryMeasurer::new(registry.clone()));
        let exporter = Exporter::new(
            Some(registry.clone()),
            measurer.clone(),
            self.policies,
            page_size,
            self.dpi,
            diagnostics.clone(),
        );

        Ok(BadgePress {
            registry,
            measurer,
            policies: self.policies,
            page_size,
            dpi: self.dpi,
            resolver,
            exporter,
            diagnostics,
        })
    }
}

/// The assembled engine: resolver, renderer, rasterizer and exporter behind
/// one handle. Cheap to share behind an `Arc`; exports serialize through the
/// internal in-flight guard.
pub struct BadgePress {
    registry: Arc<FontRegistry>,
    measurer: Arc<dyn TextMeasurer>,
    policies: FitPolicySet,
    page_size: Size,
    dpi: u32,
    resolver: TemplateResolver,
    exporter: Exporter,
    diagnostics: Option<DiagnosticsLogger>,
}

impl BadgePress {
    pub fn builder() -> BadgePressBuilder {
        BadgePressBuilder::default()
    }

    pub fn registry(&self) -> &FontRegistry {
        &self.registry
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    fn renderer(&self) -> Renderer<'_> {
        Renderer {
            measurer: self.measurer.as_ref(),
            registry: Some(&self.registry),
            policies: &self.policies,
            page_size: self.page_size,
            diagnostics: self.diagnostics.as_ref(),
        }
    }

    /// Renders one attendee's badge into a paint program without touching
    /// the network or the raster stage.
    pub fn render(&self, template: &BadgeTemplate, attendee: &AttendeeBinding) -> RenderedDocument {
        self.renderer().render(template, attendee)
    }

    pub fn rasterize(&self, document: &RenderedDocument) -> Result<Vec<RasterPage>, BadgePressError> {
        raster::rasterize(document, self.dpi, Some(&self.registry))
    }

    /// Renders and rasterizes one badge to PNG bytes, one image per side.
    /// This is the preview path; the print path goes through [`Self::export`].
    pub fn render_pngs(
        &self,
        template: &BadgeTemplate,
        attendee: &AttendeeBinding,
    ) -> Result<Vec<Vec<u8>>, BadgePressError> {
        let document = self.render(template, attendee);
        let pages = self.rasterize(&document)?;
        pages.iter().map(RasterPage::to_png).collect()
    }

    pub async fn resolve_template(&self, event_id: &str) -> ResolvedTemplate {
        self.resolver.resolve(event_id).await
    }

    pub async fn export(
        &self,
        event_id: &str,
        attendees: &[AttendeeBinding],
        cancel: &CancellationToken,
    ) -> Result<(ExportArtifact, ExportSummary), BadgePressError> {
        self.exporter
            .export(&self.resolver, event_id, attendees, cancel)
            .await
    }

    /// Exports and routes the artifact in one call.
    pub async fn export_to(
        &self,
        event_id: &str,
        attendees: &[AttendeeBinding],
        cancel: &CancellationToken,
        target: &ExportTarget,
    ) -> Result<ExportSummary, BadgePressError> {
        let (artifact, summary) = self.export(event_id, attendees, cancel).await?;
        dispatch(&artifact, target).await?;
        Ok(summary)
    }

    pub async fn import(
        &self,
        header: &[String],
        rows: &[Vec<String>],
        guest_types: &[GuestType],
        directory: Option<&dyn GuestDirectory>,
        gateway: Option<&dyn AttendeeGateway>,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, BadgePressError> {
        run_import(
            header,
            rows,
            guest_types,
            directory,
            gateway,
            self.diagnostics.as_ref(),
            cancel,
        )
        .await
    }
}
