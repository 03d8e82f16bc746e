use crate::binding::AttendeeBinding;
use crate::diagnostics::DiagnosticsLogger;
use crate::error::BadgePressError;
use crate::font::FontRegistry;
use crate::pdf;
use crate::raster::{self, RasterPage};
use crate::render::Renderer;
use crate::sizing::{FitPolicySet, TextMeasurer};
use crate::store::{TemplateOrigin, TemplateResolver};
use crate::types::Size;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Terminal consumer of a finished export (print spooler, upload, etc.).
#[async_trait]
pub trait BadgeSink: Send + Sync {
    async fn deliver(&self, artifact: &ExportArtifact) -> Result<(), BadgePressError>;
}

/// The produced document plus enough metadata to route it.
#[derive(Debug)]
pub struct ExportArtifact {
    pub pdf: Vec<u8>,
    pub pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub attendee_uuid: String,
    pub reason: String,
}

/// What actually happened during a batch export. A partially-failed batch
/// still produces a PDF; the failures list says who is missing from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub requested: usize,
    pub rendered: usize,
    pub pages: usize,
    pub failures: Vec<PageFailure>,
    pub template_origin: TemplateOrigin,
}

/// Where a finished artifact goes.
pub enum ExportTarget {
    PdfFile(PathBuf),
    Sink(Arc<dyn BadgeSink>),
}

pub async fn dispatch(
    artifact: &ExportArtifact,
    target: &ExportTarget,
) -> Result<(), BadgePressError> {
    match target {
        ExportTarget::PdfFile(path) => {
            tokio::fs::write(path, &artifact.pdf).await?;
            Ok(())
        }
        ExportTarget::Sink(sink) => sink
            .deliver(artifact)
            .await
            .map_err(|e| BadgePressError::Dispatch(e.to_string())),
    }
}

/// Renders and rasterizes a batch of badges into one PDF.
///
/// Only one export per exporter runs at a time; a second call while the
/// first is in flight fails fast with [`BadgePressError::ExportInFlight`]
/// instead of queueing up raster work behind the printer's back.
pub struct Exporter {
    registry: Option<Arc<FontRegistry>>,
    measurer: Arc<dyn TextMeasurer>,
    policies: FitPolicySet,
    page_size: Size,
    dpi: u32,
    diagnostics: Option<DiagnosticsLogger>,
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Exporter {
    pub fn new(
        registry: Option<Arc<FontRegistry>>,
        measurer: Arc<dyn TextMeasurer>,
        policies: FitPolicySet,
        page_size: Size,
        dpi: u32,
        diagnostics: Option<DiagnosticsLogger>,
    ) -> Self {
        Self {
            registry,
            measurer,
            policies,
            page_size,
            dpi,
            diagnostics,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Exports one badge per attendee, in input order. Attendees whose pages
    /// fail to rasterize are skipped and reported; the batch only fails
    /// outright when nothing could be rendered at all.
    pub async fn export(
        &self,
        resolver: &TemplateResolver,
        event_id: &str,
        attendees: &[AttendeeBinding],
        cancel: &CancellationToken,
    ) -> Result<(ExportArtifact, ExportSummary), BadgePressError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BadgePressError::ExportInFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        if attendees.is_empty() {
            return Err(BadgePressError::InvalidConfiguration(
                "export requested with no attendees".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(BadgePressError::ExportCancelled);
        }

        // Abandonment must abort a fetch already on the wire, not just be
        // noticed after it returns.
        let resolved = tokio::select! {
            resolved = resolver.resolve(event_id) => resolved,
            _ = cancel.cancelled() => return Err(BadgePressError::ExportCancelled),
        };
        let renderer = Renderer {
            measurer: self.measurer.as_ref(),
            registry: self.registry.as_deref(),
            policies: &self.policies,
            page_size: self.page_size,
            diagnostics: self.diagnostics.as_ref(),
        };

        let mut pages: Vec<RasterPage> = Vec::new();
        let mut failures: Vec<PageFailure> = Vec::new();
        let mut rendered = 0usize;

        for attendee in attendees {
            if cancel.is_cancelled() {
                return Err(BadgePressError::ExportCancelled);
            }
            let document = renderer.render(&resolved.template, attendee);
            let registry = self.registry.clone();
            let dpi = self.dpi;
            let task = tokio::task::spawn_blocking(move || {
                raster::rasterize(&document, dpi, registry.as_deref())
            });
            let joined = tokio::select! {
                joined = task => joined,
                _ = cancel.cancelled() => return Err(BadgePressError::ExportCancelled),
            };
            match joined {
                Ok(Ok(mut attendee_pages)) => {
                    pages.append(&mut attendee_pages);
                    rendered += 1;
                }
                Ok(Err(err)) => failures.push(PageFailure {
                    attendee_uuid: attendee.uuid.clone(),
                    reason: err.to_string(),
                }),
                Err(join_err) => failures.push(PageFailure {
                    attendee_uuid: attendee.uuid.clone(),
                    reason: format!("raster task failed: {join_err}"),
                }),
            }
        }

        if rendered == 0 {
            return Err(BadgePressError::ExportFailed(
                "no attendee badge could be rendered".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(BadgePressError::ExportCancelled);
        }

        let page_size = self.page_size;
        let page_count = pages.len();
        let pdf = tokio::task::spawn_blocking(move || pdf::assemble(&pages, page_size))
            .await
            .map_err(|e| BadgePressError::ExportFailed(format!("pdf task failed: {e}")))??;

        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.increment("export.attendees_rendered", rendered as u64);
            diagnostics.increment("export.attendees_failed", failures.len() as u64);
            diagnostics.increment("export.pages", page_count as u64);
            diagnostics.event(
                "export.finished",
                &[
                    ("event_id", event_id.to_string()),
                    ("template_origin", resolved.origin.as_str().to_string()),
                    ("pages", page_count.to_string()),
                ],
            );
            diagnostics.emit_summary("export");
            diagnostics.flush();
        }

        let summary = ExportSummary {
            requested: attendees.len(),
            rendered,
            pages: page_count,
            failures,
            template_origin: resolved.origin,
        };
        let artifact = ExportArtifact {
            pdf,
            pages: page_count,
        };
        Ok((artifact, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizing::ApproxMeasurer;
    use crate::store::TemplateSource;
    use crate::template::BadgeTemplate;
    use crate::types::Pt;
    use std::sync::Mutex;
    use std::time::Duration;

    fn exporter() -> Exporter {
        Exporter::new(
            None,
            Arc::new(ApproxMeasurer),
            FitPolicySet::default(),
            Size::badge_square(),
            72,
            None,
        )
    }

    fn resolver() -> TemplateResolver {
        // No source, no cache: always the built-in layout.
        TemplateResolver::new(None, None, None)
    }

    fn attendees(count: usize) -> Vec<AttendeeBinding> {
        (0..count)
            .map(|i| AttendeeBinding {
                uuid: format!("u-{i}"),
                full_name: format!("Attendee {i}"),
                company: Some("Acme".to_string()),
                job_title: None,
                guest_type_name: Some("Visitor".to_string()),
            })
            .collect()
    }

    #[tokio::test]
    async fn one_single_sided_badge_per_attendee() {
        let (artifact, summary) = exporter()
            .export(&resolver(), "ev-1", &attendees(5), &CancellationToken::new())
            .await
            .expect("export");
        assert_eq!(summary.requested, 5);
        assert_eq!(summary.rendered, 5);
        assert_eq!(summary.pages, 5);
        assert!(summary.failures.is_empty());
        assert_eq!(summary.template_origin, TemplateOrigin::BuiltinDefault);
        assert_eq!(artifact.pages, 5);
        assert!(artifact.pdf.starts_with(b"%PDF"));
    }

    struct RecordingMeasurer(Mutex<Vec<String>>);

    impl TextMeasurer for RecordingMeasurer {
        fn measure(&self, font_name: &str, font_size: Pt, text: &str) -> Pt {
            self.0.lock().unwrap().push(text.to_string());
            ApproxMeasurer.measure(font_name, font_size, text)
        }
    }

    #[tokio::test]
    async fn pages_follow_the_caller_supplied_attendee_order() {
        let measurer = Arc::new(RecordingMeasurer(Mutex::new(Vec::new())));
        let exporter = Exporter::new(
            None,
            measurer.clone(),
            FitPolicySet::default(),
            Size::badge_square(),
            72,
            None,
        );
        let batch = attendees(4);
        let (artifact, summary) = exporter
            .export(&resolver(), "ev-1", &batch, &CancellationToken::new())
            .await
            .expect("export");
        // One page per attendee, so the order names were typeset in is the
        // order pages land in the document.
        assert_eq!(summary.pages, batch.len());
        assert_eq!(artifact.pages, batch.len());
        let mut typeset: Vec<String> = measurer
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|text| text.starts_with("Attendee "))
            .cloned()
            .collect();
        typeset.dedup();
        let expected: Vec<String> = batch.iter().map(|a| a.full_name.clone()).collect();
        assert_eq!(typeset, expected);
    }

    struct HangingSource;

    #[async_trait]
    impl TemplateSource for HangingSource {
        async fn official(&self, _: &str) -> Result<Option<BadgeTemplate>, BadgePressError> {
            std::future::pending().await
        }

        async fn list(&self, _: &str) -> Result<Vec<BadgeTemplate>, BadgePressError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_an_in_flight_template_fetch() {
        let resolver = TemplateResolver::new(Some(Arc::new(HangingSource)), None, None);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = exporter()
            .export(&resolver, "ev-1", &attendees(1), &cancel)
            .await
            .expect_err("must cancel");
        assert!(matches!(err, BadgePressError::ExportCancelled));
    }

    #[tokio::test]
    async fn cancelled_before_start_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exporter()
            .export(&resolver(), "ev-1", &attendees(2), &cancel)
            .await
            .expect_err("must cancel");
        assert!(matches!(err, BadgePressError::ExportCancelled));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let err = exporter()
            .export(&resolver(), "ev-1", &[], &CancellationToken::new())
            .await
            .expect_err("must reject");
        assert!(matches!(err, BadgePressError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn second_export_fails_fast_while_first_is_in_flight() {
        let exporter = exporter();
        exporter.in_flight.store(true, Ordering::Release);
        let err = exporter
            .export(&resolver(), "ev-1", &attendees(1), &CancellationToken::new())
            .await
            .expect_err("must refuse");
        assert!(matches!(err, BadgePressError::ExportInFlight));
    }

    #[tokio::test]
    async fn guard_releases_after_failure() {
        let exporter = exporter();
        let _ = exporter
            .export(&resolver(), "ev-1", &[], &CancellationToken::new())
            .await;
        // The failed run must not leave the exporter locked.
        let ok = exporter
            .export(&resolver(), "ev-1", &attendees(1), &CancellationToken::new())
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn dispatch_writes_pdf_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("badges.pdf");
        let (artifact, _) = exporter()
            .export(&resolver(), "ev-1", &attendees(1), &CancellationToken::new())
            .await
            .expect("export");
        dispatch(&artifact, &ExportTarget::PdfFile(path.clone()))
            .await
            .expect("dispatch");
        let written = std::fs::read(&path).expect("read back");
        assert_eq!(written, artifact.pdf);
    }

    struct RecordingSink(Mutex<Vec<usize>>);

    #[async_trait]
    impl BadgeSink for RecordingSink {
        async fn deliver(&self, artifact: &ExportArtifact) -> Result<(), BadgePressError> {
            self.0.lock().unwrap().push(artifact.pages);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_sinks() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let (artifact, _) = exporter()
            .export(&resolver(), "ev-1", &attendees(2), &CancellationToken::new())
            .await
            .expect("export");
        dispatch(&artifact, &ExportTarget::Sink(sink.clone()))
            .await
            .expect("dispatch");
        assert_eq!(*sink.0.lock().unwrap(), vec![2]);
    }
}
