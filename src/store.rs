use crate::diagnostics::DiagnosticsLogger;
use crate::error::BadgePressError;
use crate::template::{self, BadgeTemplate, TemplateStatus};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Where a resolved template actually came from. Printed badges must never
/// silently degrade, so every consumer gets told which rung of the fallback
/// ladder produced the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateOrigin {
    Official,
    FirstAvailable,
    Cache,
    BuiltinDefault,
}

impl TemplateOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateOrigin::Official => "official",
            TemplateOrigin::FirstAvailable => "first_available",
            TemplateOrigin::Cache => "cache",
            TemplateOrigin::BuiltinDefault => "builtin_default",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTemplate {
    pub template: BadgeTemplate,
    pub origin: TemplateOrigin,
}

/// Remote template endpoints. Both calls are read-only; `official` returning
/// `Ok(None)` means the event exists but no template has been promoted yet.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn official(&self, event_id: &str) -> Result<Option<BadgeTemplate>, BadgePressError>;
    async fn list(&self, event_id: &str) -> Result<Vec<BadgeTemplate>, BadgePressError>;
}

pub struct HttpTemplateStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTemplateStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BadgePressError> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BadgePressError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(BadgePressError::InvalidConfiguration(
                "template store base url is empty".to_string(),
            ));
        }
        Ok(Self { client, base_url })
    }

    fn url(&self, event_id: &str, suffix: &str) -> String {
        format!("{}/events/{event_id}/badge-templates{suffix}", self.base_url)
    }
}

#[async_trait]
impl TemplateSource for HttpTemplateStore {
    async fn official(&self, event_id: &str) -> Result<Option<BadgeTemplate>, BadgePressError> {
        let url = self.url(event_id, "/official");
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BadgePressError::RemoteStatus(
                response.status().as_u16(),
                url,
            ));
        }
        let template: BadgeTemplate = response.json().await?;
        template.validate()?;
        Ok(Some(template))
    }

    async fn list(&self, event_id: &str) -> Result<Vec<BadgeTemplate>, BadgePressError> {
        let url = self.url(event_id, "");
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(BadgePressError::RemoteStatus(
                response.status().as_u16(),
                url,
            ));
        }
        let templates: Vec<BadgeTemplate> = response.json().await?;
        Ok(templates)
    }
}

/// `GET /events/{id}/attendees/{attendeeId}` client; fetches the attendee
/// record the renderer binds into a template.
pub struct HttpAttendeeSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAttendeeSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BadgePressError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn binding(
        &self,
        event_id: &str,
        attendee_id: &str,
    ) -> Result<crate::binding::AttendeeBinding, BadgePressError> {
        let url = format!(
            "{}/events/{event_id}/attendees/{attendee_id}",
            self.base_url
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(BadgePressError::RemoteStatus(
                response.status().as_u16(),
                url,
            ));
        }
        Ok(response.json().await?)
    }
}

/// On-disk copy of the last template that was successfully fetched for an
/// event, for offline or degraded-network operation. Best-effort on writes.
pub struct TemplateCache {
    dir: PathBuf,
}

impl TemplateCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, event_id: &str) -> PathBuf {
        let safe: String = event_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("template-{safe}.json"))
    }

    pub async fn load(&self, event_id: &str) -> Option<BadgeTemplate> {
        let json = tokio::fs::read_to_string(self.path(event_id)).await.ok()?;
        BadgeTemplate::decode(&json).ok()
    }

    pub async fn store(&self, template: &BadgeTemplate) {
        let Ok(json) = serde_json::to_string(template) else {
            return;
        };
        let _ = tokio::fs::create_dir_all(&self.dir).await;
        let _ = tokio::fs::write(self.path(&template.event_id), json).await;
    }
}

/// Walks the fallback ladder: official template, then the first non-archived
/// template the event has, then the local cache, then the built-in layout.
///
/// Resolution is total. Network and decode failures move to the next rung
/// rather than surfacing; the origin in the result says how far we fell.
pub struct TemplateResolver {
    source: Option<Arc<dyn TemplateSource>>,
    cache: Option<TemplateCache>,
    diagnostics: Option<DiagnosticsLogger>,
}

impl TemplateResolver {
    pub fn new(
        source: Option<Arc<dyn TemplateSource>>,
        cache: Option<TemplateCache>,
        diagnostics: Option<DiagnosticsLogger>,
    ) -> Self {
        Self {
            source,
            cache,
            diagnostics,
        }
    }

    pub async fn resolve(&self, event_id: &str) -> ResolvedTemplate {
        if let Some(source) = &self.source {
            match source.official(event_id).await {
                Ok(Some(template)) => {
                    self.write_back(&template).await;
                    return ResolvedTemplate {
                        template,
                        origin: TemplateOrigin::Official,
                    };
                }
                Ok(None) => {}
                Err(err) => self.note_failure("official", event_id, &err),
            }

            match source.list(event_id).await {
                Ok(templates) => {
                    let first = templates
                        .into_iter()
                        .find(|t| t.status != TemplateStatus::Archived);
                    if let Some(template) = first {
                        self.write_back(&template).await;
                        return ResolvedTemplate {
                            template,
                            origin: TemplateOrigin::FirstAvailable,
                        };
                    }
                }
                Err(err) => self.note_failure("list", event_id, &err),
            }
        }

        if let Some(cache) = &self.cache {
            if let Some(template) = cache.load(event_id).await {
                return ResolvedTemplate {
                    template,
                    origin: TemplateOrigin::Cache,
                };
            }
        }

        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.increment("template.fallback_default", 1);
            diagnostics.event(
                "template.fallback_default",
                &[("event_id", event_id.to_string())],
            );
        }
        ResolvedTemplate {
            template: template::default_template(event_id),
            origin: TemplateOrigin::BuiltinDefault,
        }
    }

    async fn write_back(&self, template: &BadgeTemplate) {
        if let Some(cache) = &self.cache {
            cache.store(template).await;
        }
    }

    fn note_failure(&self, call: &str, event_id: &str, err: &BadgePressError) {
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.event(
                "template.fetch_failed",
                &[
                    ("call", call.to_string()),
                    ("event_id", event_id.to_string()),
                    ("error", err.to_string()),
                ],
            );
        }
    }
}
