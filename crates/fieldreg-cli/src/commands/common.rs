use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fieldreg_core::config::RegistryConfig;
use fieldreg_core::db::DocumentFilter;
use fieldreg_core::models::{Customer, Geolocation, SyncConflict};
use fieldreg_core::services::StoreService;
use fieldreg_core::{Document, DocumentId};
use serde::Serialize;

use crate::cli::{CustomerArgs, LocationArgs};
use crate::error::CliError;

pub const ENV_DB_PATH: &str = "FIELDREG_DB_PATH";
const CONFIG_FILE_NAME: &str = "config.json";
const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct DocumentListItem {
    pub id: String,
    pub business_name: String,
    pub contact_person: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: String,
    pub location: Option<String>,
    pub sync_status: String,
    pub revision: Option<String>,
    pub deleted: bool,
    pub updated_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub document_id: String,
    pub strategy: String,
    pub local_revision: String,
    pub remote_revision: String,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub resolved_at: Option<i64>,
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    Ok(dirs::config_dir()
        .ok_or(CliError::MissingPlatformDir("config"))?
        .join("fieldreg")
        .join(CONFIG_FILE_NAME))
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    Ok(dirs::data_dir()
        .ok_or(CliError::MissingPlatformDir("data"))?
        .join("fieldreg")
        .join("fieldreg.db"))
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> Result<PathBuf, CliError> {
    cli_config.map_or_else(default_config_path, Ok)
}

pub fn load_config(path: &Path) -> Result<RegistryConfig, CliError> {
    Ok(RegistryConfig::load_from_path(path)?)
}

/// `--db-path`, then `FIELDREG_DB_PATH`, then the config file, then the data dir.
pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    env_db_path: Option<PathBuf>,
    config: &RegistryConfig,
) -> Result<PathBuf, CliError> {
    cli_db_path
        .or(env_db_path)
        .or_else(|| config.db_path())
        .map_or_else(default_db_path, Ok)
}

pub fn env_db_path() -> Option<PathBuf> {
    env::var_os(ENV_DB_PATH)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub async fn open_store(path: &Path) -> Result<StoreService, CliError> {
    Ok(StoreService::open_path(path).await?)
}

pub fn normalize_document_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyDocumentId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find a customer by full id or unique id prefix.
pub async fn resolve_document(query: &str, store: &StoreService) -> Result<Document, CliError> {
    let query = normalize_document_identifier(query)?;
    if let Ok(id) = query.parse::<DocumentId>() {
        if let Some(document) = store.find(&id).await? {
            return Ok(document);
        }
    }

    let prefix = query.to_ascii_lowercase();
    let mut matching = store
        .list(DocumentFilter::default().including_deleted())
        .await?
        .into_iter()
        .filter(|document| document.id.as_str().starts_with(&prefix))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::DocumentNotFound(query)),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|document| short_id(&document.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousDocumentId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Build a new customer; business, contact, phone and address are mandatory.
pub fn build_customer(fields: &CustomerArgs, location: LocationArgs) -> Result<Customer, CliError> {
    let business = fields.business.clone().ok_or(CliError::MissingField("business"))?;
    let contact = fields.contact.clone().ok_or(CliError::MissingField("contact"))?;
    let phone = fields.phone.clone().ok_or(CliError::MissingField("phone"))?;
    let address = fields.address.clone().ok_or(CliError::MissingField("address"))?;

    let mut customer = Customer::new(business, contact, phone, address);
    customer.email.clone_from(&fields.email);
    customer.geolocation = location_from_args(location)?;
    Ok(customer)
}

/// Apply edit flags to `customer`; returns whether anything changed.
pub fn apply_customer_edits(
    customer: &mut Customer,
    fields: &CustomerArgs,
    location: LocationArgs,
    clear_location: bool,
) -> Result<bool, CliError> {
    let before = customer.clone();

    if let Some(business) = &fields.business {
        customer.business_name.clone_from(business);
    }
    if let Some(contact) = &fields.contact {
        customer.contact_person.clone_from(contact);
    }
    if let Some(phone) = &fields.phone {
        customer.phone.clone_from(phone);
    }
    if let Some(email) = &fields.email {
        customer.email = Some(email.clone());
    }
    if let Some(address) = &fields.address {
        customer.address.clone_from(address);
    }
    if clear_location {
        customer.geolocation = None;
    } else if let Some(reading) = location_from_args(location)? {
        customer.geolocation = Some(reading);
    }

    customer.normalize();
    Ok(*customer != before)
}

pub fn location_from_args(location: LocationArgs) -> Result<Option<Geolocation>, CliError> {
    match (location.lat, location.lon, location.accuracy) {
        (None, None, None) => Ok(None),
        (Some(lat), Some(lon), Some(accuracy)) => {
            Geolocation::new(lat, lon, accuracy, Utc::now().timestamp_millis())
                .map(Some)
                .map_err(CliError::InvalidLocation)
        }
        _ => Err(CliError::InvalidLocation(
            "--lat, --lon and --accuracy must be given together".to_string(),
        )),
    }
}

pub fn short_id(id: &DocumentId) -> String {
    id.as_str().chars().take(SHORT_ID_LEN).collect()
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_document_lines(documents: &[Document]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    documents
        .iter()
        .map(|document| {
            let id = short_id(&document.id);
            let name = truncate_text(&document.customer.business_name, 28);
            let status = if document.deleted {
                "deleted"
            } else {
                document.sync_status.as_str()
            };
            let relative_time = format_relative_time(document.updated_at, now_ms);
            format!("{id:<13}  {name:<28}  {status:<8}  {relative_time}")
        })
        .collect()
}

pub fn document_to_list_item(document: &Document) -> DocumentListItem {
    let now_ms = Utc::now().timestamp_millis();
    let customer = &document.customer;

    DocumentListItem {
        id: document.id.to_string(),
        business_name: customer.business_name.clone(),
        contact_person: customer.contact_person.clone(),
        phone: customer.phone.clone(),
        email: customer.email.clone(),
        address: customer.address.clone(),
        location: customer.geolocation.as_ref().map(Geolocation::label),
        sync_status: document.sync_status.to_string(),
        revision: document.revision.as_ref().map(ToString::to_string),
        deleted: document.deleted,
        updated_at: document.updated_at,
        relative_time: format_relative_time(document.updated_at, now_ms),
    }
}

pub fn format_document_detail(document: &Document) -> Vec<String> {
    let customer = &document.customer;
    let mut lines = vec![
        format!("id:        {}", document.id),
        format!("business:  {}", customer.business_name),
        format!("contact:   {}", customer.contact_person),
        format!("phone:     {}", customer.phone),
    ];
    if let Some(email) = &customer.email {
        lines.push(format!("email:     {email}"));
    }
    lines.push(format!("address:   {}", customer.address));
    if let Some(reading) = &customer.geolocation {
        lines.push(format!(
            "location:  {} (±{:.0} m)",
            reading.label(),
            reading.accuracy
        ));
    }
    lines.push(format!("status:    {}", document.sync_status));
    if let Some(revision) = &document.revision {
        lines.push(format!("revision:  {revision}"));
    }
    lines.push(format!("updated:   {}", format_sync_timestamp(document.updated_at)));
    lines
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        document_id: conflict.document_id.clone(),
        strategy: conflict.strategy.to_string(),
        local_revision: conflict.local_revision.clone(),
        remote_revision: conflict.remote_revision.clone(),
        detected_at: conflict.detected_at,
        detected_at_iso: format_sync_timestamp(conflict.detected_at),
        resolved_at: conflict.resolved_at,
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let state = if conflict.is_resolved() { "resolved" } else { "open" };
            format!(
                "{}  {:<9}  {:<8}  customer={}  local={} remote={}",
                format_sync_timestamp(conflict.detected_at),
                conflict.strategy,
                state,
                conflict.document_id,
                conflict.local_revision,
                conflict.remote_revision
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
