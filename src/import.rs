use crate::diagnostics::DiagnosticsLogger;
use crate::error::BadgePressError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Canonical spreadsheet columns the importer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Email,
    Phone,
    Company,
    JobTitle,
    Gender,
    Country,
    GuestTypeName,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Name,
        Field::Email,
        Field::Phone,
        Field::Company,
        Field::JobTitle,
        Field::Gender,
        Field::Country,
        Field::GuestTypeName,
    ];

    pub fn canonical(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Email => "email",
            Field::Phone => "phone",
            Field::Company => "company",
            Field::JobTitle => "job_title",
            Field::Gender => "gender",
            Field::Country => "country",
            Field::GuestTypeName => "guest_type_name",
        }
    }
}

/// Header row written into generated sample sheets, in canonical column order.
pub const SAMPLE_HEADER_ROW: [&str; 8] = [
    "Name",
    "Email",
    "Phone",
    "Company",
    "Job Title",
    "Gender",
    "Country",
    "Guest Type",
];

/// Lowercases and strips everything that is not a letter or digit, so
/// "Job Title", "job-title" and "JobTitle" all land on the same key.
fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn field_for_header(raw: &str) -> Option<Field> {
    match normalize_header(raw).as_str() {
        "name" | "fullname" | "attendeename" | "guestname" => Some(Field::Name),
        "email" | "emailaddress" | "mail" => Some(Field::Email),
        "phone" | "phonenumber" | "mobile" | "tel" | "telephone" => Some(Field::Phone),
        "company" | "organisation" | "organization" | "companyname" => Some(Field::Company),
        "jobtitle" | "job" | "title" | "position" | "role" | "designation" => Some(Field::JobTitle),
        "gender" | "sex" => Some(Field::Gender),
        "country" | "nation" | "nationality" => Some(Field::Country),
        "guesttype" | "guesttypename" | "attendeetype" | "tickettype" | "type" => {
            Some(Field::GuestTypeName)
        }
        _ => None,
    }
}

/// Mapping from canonical fields to column indexes in one uploaded sheet.
/// Missing optional columns are reported, not fatal; the row validator
/// decides what a row can live without.
#[derive(Debug)]
pub struct HeaderMap {
    columns: HashMap<Field, usize>,
    pub missing: Vec<Field>,
}

impl HeaderMap {
    pub fn from_row(headers: &[String]) -> HeaderMap {
        let mut columns = HashMap::new();
        for (index, header) in headers.iter().enumerate() {
            if let Some(field) = field_for_header(header) {
                columns.entry(field).or_insert(index);
            }
        }
        let missing = Field::ALL
            .iter()
            .copied()
            .filter(|field| !columns.contains_key(field))
            .collect();
        HeaderMap { columns, missing }
    }

    fn value<'a>(&self, field: Field, row: &'a [String]) -> Option<&'a str> {
        let index = *self.columns.get(&field)?;
        let raw = row.get(index)?.trim();
        if raw.is_empty() { None } else { Some(raw) }
    }
}

/// One rejected or partially-failed row. `row` is the 1-based data row
/// number (the header row is not counted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub field: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRow {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub gender: Option<String>,
    pub country: Option<String>,
    pub guest_type_name: String,
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern"))
}

/// Validates and normalizes one data row. Errors carry the offending field so
/// the uploader can fix their sheet without guessing.
fn normalize_row(map: &HeaderMap, row_number: usize, row: &[String]) -> Result<NormalizedRow, RowError> {
    let require = |field: Field| -> Result<String, RowError> {
        map.value(field, row)
            .map(str::to_string)
            .ok_or_else(|| RowError {
                row: row_number,
                field: field.canonical().to_string(),
                reason: "required value is missing".to_string(),
            })
    };

    let name = require(Field::Name)?;
    let email = require(Field::Email)?;
    let guest_type_name = require(Field::GuestTypeName)?;

    if !email_pattern().is_match(&email) {
        return Err(RowError {
            row: row_number,
            field: Field::Email.canonical().to_string(),
            reason: format!("'{email}' is not a valid email address"),
        });
    }

    Ok(NormalizedRow {
        name,
        email,
        phone: map.value(Field::Phone, row).map(str::to_string),
        company: map.value(Field::Company, row).map(str::to_string),
        job_title: map.value(Field::JobTitle, row).map(str::to_string),
        gender: map.value(Field::Gender, row).map(str::to_string),
        country: map.value(Field::Country, row).map(str::to_string),
        guest_type_name,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestType {
    pub id: String,
    pub name: String,
}

/// Case-insensitive guest-type lookup; leading/trailing whitespace in the
/// sheet is forgiven.
pub fn resolve_guest_type<'a>(types: &'a [GuestType], name: &str) -> Option<&'a GuestType> {
    let wanted = name.trim().to_lowercase();
    types.iter().find(|t| t.name.trim().to_lowercase() == wanted)
}

/// Whether a row creates a new attendee or updates one that already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RowIntent {
    Create,
    Update { uuid: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    pub row: usize,
    pub data: NormalizedRow,
    pub guest_type_id: String,
    pub intent: RowIntent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestCheck {
    pub exists: bool,
    pub uuid: Option<String>,
}

/// Looks up whether an email already belongs to a registered guest.
#[async_trait]
pub trait GuestDirectory: Send + Sync {
    async fn check(&self, email: &str) -> Result<GuestCheck, BadgePressError>;
}

/// Receives the validated batch. Returns per-row rejections the server side
/// produced (duplicates, quota, etc.), which merge into the caller's list.
#[async_trait]
pub trait AttendeeGateway: Send + Sync {
    async fn submit(&self, records: &[ImportRecord]) -> Result<Vec<RowError>, BadgePressError>;
}

/// `POST /events/{id}/attendees/check-guest` client.
pub struct HttpGuestDirectory {
    client: reqwest::Client,
    base_url: String,
    event_id: String,
}

impl HttpGuestDirectory {
    pub fn new(
        base_url: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Result<Self, BadgePressError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            event_id: event_id.into(),
        })
    }
}

#[derive(Deserialize)]
struct CheckGuestResponse {
    #[serde(default)]
    exists: bool,
    #[serde(default)]
    guest_info: Option<GuestInfo>,
}

#[derive(Deserialize)]
struct GuestInfo {
    #[serde(default)]
    uuid: Option<String>,
}

#[async_trait]
impl GuestDirectory for HttpGuestDirectory {
    async fn check(&self, email: &str) -> Result<GuestCheck, BadgePressError> {
        let url = format!(
            "{}/events/{}/attendees/check-guest",
            self.base_url, self.event_id
        );
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BadgePressError::RemoteStatus(
                response.status().as_u16(),
                url,
            ));
        }
        let body: CheckGuestResponse = response.json().await?;
        Ok(GuestCheck {
            exists: body.exists,
            uuid: body.guest_info.and_then(|g| g.uuid),
        })
    }
}

/// `POST /events/{id}/attendees/batch` client.
pub struct HttpAttendeeGateway {
    client: reqwest::Client,
    base_url: String,
    event_id: String,
}

impl HttpAttendeeGateway {
    pub fn new(
        base_url: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Result<Self, BadgePressError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            event_id: event_id.into(),
        })
    }
}

#[derive(Deserialize)]
struct BatchResponse {
    #[serde(default)]
    errors: Vec<RowError>,
}

#[async_trait]
impl AttendeeGateway for HttpAttendeeGateway {
    async fn submit(&self, records: &[ImportRecord]) -> Result<Vec<RowError>, BadgePressError> {
        let url = format!("{}/events/{}/attendees/batch", self.base_url, self.event_id);
        let response = self.client.post(&url).json(&records).send().await?;
        if !response.status().is_success() {
            return Err(BadgePressError::RemoteStatus(
                response.status().as_u16(),
                url,
            ));
        }
        let body: BatchResponse = response.json().await?;
        Ok(body.errors)
    }
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub records: Vec<ImportRecord>,
    pub errors: Vec<RowError>,
    /// Canonical names of columns the sheet did not carry at all.
    pub missing_columns: Vec<String>,
}

impl ImportOutcome {
    pub fn created(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.intent == RowIntent::Create)
            .count()
    }

    pub fn updated(&self) -> usize {
        self.records.len() - self.created()
    }
}

/// Runs the whole import: header mapping, row validation, guest-type
/// resolution, existing-guest detection and batch submission.
///
/// Bad rows never abort the batch; they are collected and the good rows
/// proceed. A directory outage downgrades every row to a create intent
/// instead of blocking the import.
///
/// Cancelling the token abandons the import immediately, aborting any
/// guest-check or batch-submit call still on the wire.
pub async fn run_import(
    header: &[String],
    rows: &[Vec<String>],
    guest_types: &[GuestType],
    directory: Option<&dyn GuestDirectory>,
    gateway: Option<&dyn AttendeeGateway>,
    diagnostics: Option<&DiagnosticsLogger>,
    cancel: &CancellationToken,
) -> Result<ImportOutcome, BadgePressError> {
    if cancel.is_cancelled() {
        return Err(BadgePressError::ImportCancelled);
    }
    let map = HeaderMap::from_row(header);
    let mut records = Vec::new();
    let mut errors = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let row_number = index + 1;
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let data = match normalize_row(&map, row_number, row) {
            Ok(data) => data,
            Err(err) => {
                errors.push(err);
                continue;
            }
        };

        let Some(guest_type) = resolve_guest_type(guest_types, &data.guest_type_name) else {
            errors.push(RowError {
                row: row_number,
                field: Field::GuestTypeName.canonical().to_string(),
                reason: format!("unknown guest type '{}'", data.guest_type_name),
            });
            continue;
        };

        let intent = match directory {
            Some(directory) => {
                let checked = tokio::select! {
                    checked = directory.check(&data.email) => checked,
                    _ = cancel.cancelled() => return Err(BadgePressError::ImportCancelled),
                };
                match checked {
                    Ok(GuestCheck {
                        exists: true,
                        uuid: Some(uuid),
                    }) => RowIntent::Update { uuid },
                    Ok(_) => RowIntent::Create,
                    Err(err) => {
                        if let Some(diagnostics) = diagnostics {
                            diagnostics.event(
                                "import.directory_unreachable",
                                &[
                                    ("row", row_number.to_string()),
                                    ("error", err.to_string()),
                                ],
                            );
                        }
                        RowIntent::Create
                    }
                }
            }
            None => RowIntent::Create,
        };

        records.push(ImportRecord {
            row: row_number,
            data,
            guest_type_id: guest_type.id.clone(),
            intent,
        });
    }

    if let Some(gateway) = gateway {
        if !records.is_empty() {
            let remote_errors = tokio::select! {
                submitted = gateway.submit(&records) => submitted?,
                _ = cancel.cancelled() => return Err(BadgePressError::ImportCancelled),
            };
            let rejected: Vec<usize> = remote_errors.iter().map(|e| e.row).collect();
            records.retain(|r| !rejected.contains(&r.row));
            errors.extend(remote_errors);
        }
    }
    errors.sort_by_key(|e| e.row);

    if let Some(diagnostics) = diagnostics {
        diagnostics.increment("import.accepted", records.len() as u64);
        diagnostics.increment("import.rejected", errors.len() as u64);
    }

    Ok(ImportOutcome {
        records,
        errors,
        missing_columns: map
            .missing
            .iter()
            .map(|f| f.canonical().to_string())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    fn guest_types() -> Vec<GuestType> {
        vec![
            GuestType {
                id: "gt-1".to_string(),
                name: "Speaker".to_string(),
            },
            GuestType {
                id: "gt-2".to_string(),
                name: "Visitor".to_string(),
            },
        ]
    }

    struct KnownEmails(Vec<(String, String)>);

    #[async_trait]
    impl GuestDirectory for KnownEmails {
        async fn check(&self, email: &str) -> Result<GuestCheck, BadgePressError> {
            match self.0.iter().find(|(known, _)| known == email) {
                Some((_, uuid)) => Ok(GuestCheck {
                    exists: true,
                    uuid: Some(uuid.clone()),
                }),
                None => Ok(GuestCheck {
                    exists: false,
                    uuid: None,
                }),
            }
        }
    }

    struct DownDirectory;

    #[async_trait]
    impl GuestDirectory for DownDirectory {
        async fn check(&self, _: &str) -> Result<GuestCheck, BadgePressError> {
            Err(BadgePressError::RemoteStatus(502, "http://dir".to_string()))
        }
    }

    struct RejectRow(usize);

    #[async_trait]
    impl AttendeeGateway for RejectRow {
        async fn submit(&self, _: &[ImportRecord]) -> Result<Vec<RowError>, BadgePressError> {
            Ok(vec![RowError {
                row: self.0,
                field: "email".to_string(),
                reason: "duplicate registration".to_string(),
            }])
        }
    }

    #[test]
    fn headers_map_through_synonyms_and_report_missing() {
        let map = HeaderMap::from_row(&strings(&[
            "Full Name",
            "E-Mail",
            "Organisation",
            "Job",
            "Guest Type",
        ]));
        assert!(map.columns.contains_key(&Field::Name));
        assert!(map.columns.contains_key(&Field::Email));
        assert!(map.columns.contains_key(&Field::Company));
        assert!(map.columns.contains_key(&Field::JobTitle));
        assert!(map.columns.contains_key(&Field::GuestTypeName));
        assert!(map.missing.contains(&Field::Phone));
        assert!(map.missing.contains(&Field::Country));
    }

    #[test]
    fn sample_header_row_maps_onto_every_field() {
        let headers: Vec<String> = SAMPLE_HEADER_ROW.iter().map(|s| s.to_string()).collect();
        let map = HeaderMap::from_row(&headers);
        assert!(map.missing.is_empty());
    }

    #[tokio::test]
    async fn valid_rows_become_records_and_bad_rows_become_errors() {
        let header = strings(&["Name", "Email", "Guest Type", "Company"]);
        let rows = vec![
            strings(&["Ada Lovelace", "ada@engines.example", "Speaker", "Analytical"]),
            strings(&["", "missing@name.example", "Speaker", ""]),
            strings(&["Bad Email", "not-an-email", "Speaker", ""]),
            strings(&["Charles Babbage", "cb@engines.example", "Machinist", ""]),
            strings(&["", "", "", ""]),
        ];
        let outcome = run_import(&header, &rows, &guest_types(), None, None, None, &CancellationToken::new())
            .await
            .expect("import");
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].data.name, "Ada Lovelace");
        assert_eq!(outcome.records[0].guest_type_id, "gt-1");
        assert_eq!(outcome.errors.len(), 3);
        assert_eq!(outcome.errors[0].row, 2);
        assert_eq!(outcome.errors[0].field, "name");
        assert_eq!(outcome.errors[1].row, 3);
        assert_eq!(outcome.errors[1].field, "email");
        assert_eq!(outcome.errors[2].row, 4);
        assert_eq!(outcome.errors[2].field, "guest_type_name");
    }

    #[tokio::test]
    async fn guest_type_matching_is_case_insensitive() {
        let header = strings(&["Name", "Email", "Guest Type"]);
        let rows = vec![strings(&["Ada", "ada@x.example", "  sPeAkEr "])];
        let outcome = run_import(&header, &rows, &guest_types(), None, None, None, &CancellationToken::new())
            .await
            .expect("import");
        assert_eq!(outcome.records[0].guest_type_id, "gt-1");
    }

    #[tokio::test]
    async fn known_emails_become_updates() {
        let header = strings(&["Name", "Email", "Guest Type"]);
        let rows = vec![
            strings(&["Ada", "ada@x.example", "Speaker"]),
            strings(&["Bob", "bob@x.example", "Visitor"]),
        ];
        let directory = KnownEmails(vec![("ada@x.example".to_string(), "u-ada".to_string())]);
        let outcome = run_import(&header, &rows, &guest_types(), Some(&directory), None, None, &CancellationToken::new())
            .await
            .expect("import");
        assert_eq!(
            outcome.records[0].intent,
            RowIntent::Update {
                uuid: "u-ada".to_string()
            }
        );
        assert_eq!(outcome.records[1].intent, RowIntent::Create);
        assert_eq!(outcome.created(), 1);
        assert_eq!(outcome.updated(), 1);
    }

    #[tokio::test]
    async fn directory_outage_degrades_to_create() {
        let header = strings(&["Name", "Email", "Guest Type"]);
        let rows = vec![strings(&["Ada", "ada@x.example", "Speaker"])];
        let outcome = run_import(&header, &rows, &guest_types(), Some(&DownDirectory), None, None, &CancellationToken::new())
            .await
            .expect("import");
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].intent, RowIntent::Create);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn gateway_rejections_merge_into_the_error_list() {
        let header = strings(&["Name", "Email", "Guest Type"]);
        let rows = vec![
            strings(&["Ada", "ada@x.example", "Speaker"]),
            strings(&["Bob", "bob@x.example", "Visitor"]),
        ];
        let gateway = RejectRow(2);
        let outcome = run_import(&header, &rows, &guest_types(), None, Some(&gateway), None, &CancellationToken::new())
            .await
            .expect("import");
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].row, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].reason, "duplicate registration");
    }

    struct HangingDirectory;

    #[async_trait]
    impl GuestDirectory for HangingDirectory {
        async fn check(&self, _: &str) -> Result<GuestCheck, BadgePressError> {
            std::future::pending().await
        }
    }

    struct HangingGateway;

    #[async_trait]
    impl AttendeeGateway for HangingGateway {
        async fn submit(&self, _: &[ImportRecord]) -> Result<Vec<RowError>, BadgePressError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_an_in_flight_guest_check() {
        let header = strings(&["Name", "Email", "Guest Type"]);
        let rows = vec![strings(&["Ada", "ada@x.example", "Speaker"])];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = run_import(
            &header,
            &rows,
            &guest_types(),
            Some(&HangingDirectory),
            None,
            None,
            &cancel,
        )
        .await
        .expect_err("must cancel");
        assert!(matches!(err, BadgePressError::ImportCancelled));
    }

    #[tokio::test]
    async fn cancellation_aborts_an_in_flight_batch_submit() {
        let header = strings(&["Name", "Email", "Guest Type"]);
        let rows = vec![strings(&["Ada", "ada@x.example", "Speaker"])];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = run_import(
            &header,
            &rows,
            &guest_types(),
            None,
            Some(&HangingGateway),
            None,
            &cancel,
        )
        .await
        .expect_err("must cancel");
        assert!(matches!(err, BadgePressError::ImportCancelled));
    }

    #[tokio::test]
    async fn cancelled_before_start_short_circuits() {
        let header = strings(&["Name", "Email", "Guest Type"]);
        let rows = vec![strings(&["Ada", "ada@x.example", "Speaker"])];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_import(&header, &rows, &guest_types(), None, None, None, &cancel)
            .await
            .expect_err("must cancel");
        assert!(matches!(err, BadgePressError::ImportCancelled));
    }
}
