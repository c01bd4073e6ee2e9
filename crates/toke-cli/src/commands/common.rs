use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use toke_core::models::{Rating, Size, SizeUnit, StrainType};
use toke_core::remote::{RemoteGateway, SupabaseGateway};
use toke_core::sync::Listing;
use toke_core::{ClientConfig, ClientContext, Entry, EntryDraft, EntryId};

use crate::cli::AddArgs;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct EntryListItem<'a> {
    #[serde(flatten)]
    pub entry: &'a Entry,
    pub favorite: bool,
}

/// File values win; the environment fills the gaps. `--cache-dir` wins over both.
pub fn resolve_config(
    config_path: Option<&Path>,
    cache_dir: Option<PathBuf>,
    env: ClientConfig,
) -> Result<ClientConfig, CliError> {
    let file = match config_path {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    let mut config = file.with_fallback(env);
    if cache_dir.is_some() {
        config.cache_dir = cache_dir;
    }
    Ok(config)
}

pub fn open_context(
    config_path: Option<&Path>,
    cache_dir: Option<PathBuf>,
) -> Result<ClientContext<SupabaseGateway>, CliError> {
    let config = resolve_config(config_path, cache_dir, ClientConfig::from_env())?;
    Ok(ClientContext::from_config(config)?)
}

pub fn parse_entry_id(raw: &str) -> Result<EntryId, CliError> {
    raw.parse::<EntryId>().map_err(|_| CliError::EmptyEntryId)
}

pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, CliError> {
    let trimmed = raw.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| CliError::InvalidDate(raw.to_string()))
}

pub fn build_draft(args: &AddArgs) -> Result<EntryDraft, CliError> {
    let mut draft = EntryDraft::new(args.strain.clone());
    draft.brand = args.brand.clone();
    draft.strain_type = args.strain_type.parse::<StrainType>()?;
    draft.size = Size::new(args.size, args.unit.parse::<SizeUnit>()?);
    draft.cost = args.cost;
    draft.high_rating = Rating::new(args.high)?;
    draft.flavor_rating = Rating::new(args.flavor)?;
    draft.high_description = args.high_notes.clone();
    draft.flavor_description = args.flavor_notes.clone();
    if let Some(raw) = &args.date {
        draft.date = parse_date(raw)?;
    }
    draft.validate()?;
    Ok(draft)
}

/// Lowercase extension of `path`, if any.
pub fn image_extension(path: &Path) -> String {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

pub fn format_entry_lines(entries: &[Entry], favorites: &BTreeSet<EntryId>) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let id = entry.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let marker = if favorites.contains(&entry.id) { "*" } else { " " };
            let name = match &entry.brand {
                Some(brand) => format!("{} ({brand})", entry.strain),
                None => entry.strain.clone(),
            };
            format!(
                "{short_id:<13} {marker} {name:<36}  {:<11}  high {}  flavor {}  {}",
                entry.strain_type.to_string(),
                entry.high_rating,
                entry.flavor_rating,
                entry.date.format("%Y-%m-%d")
            )
        })
        .collect()
}

pub fn format_entry_detail(entry: &Entry, favorite: bool) -> Vec<String> {
    let mut lines = vec![
        format!("{}{}", entry.strain, if favorite { " *" } else { "" }),
        format!("  id:      {}", entry.id),
    ];
    if let Some(brand) = &entry.brand {
        lines.push(format!("  brand:   {brand}"));
    }
    lines.push(format!("  type:    {}", entry.strain_type));
    lines.push(format!("  size:    {}", entry.size));
    lines.push(format!("  cost:    {:.2}", entry.cost));
    lines.push(format!("  high:    {}", entry.high_rating));
    if let Some(notes) = &entry.high_description {
        lines.push(format!("           {notes}"));
    }
    lines.push(format!("  flavor:  {}", entry.flavor_rating));
    if let Some(notes) = &entry.flavor_description {
        lines.push(format!("           {notes}"));
    }
    lines.push(format!("  date:    {}", entry.date.format("%Y-%m-%d")));
    if let Some(image) = &entry.image {
        lines.push(format!("  image:   {image}"));
    }
    lines
}

pub fn listing_note(listing: &Listing) -> Option<String> {
    listing
        .warning
        .as_ref()
        .map(|warning| format!("warning: {warning}"))
}

pub fn ensure_signed_in<R: RemoteGateway>(ctx: &ClientContext<R>) -> Result<(), CliError> {
    if ctx.session().state().is_signed_in() {
        Ok(())
    } else {
        Err(CliError::NotSignedIn)
    }
}
