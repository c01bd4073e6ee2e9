use toke_core::models::filter_entries;
use toke_core::remote::RemoteGateway;
use toke_core::sync::SyncEvent;
use toke_core::ClientContext;

use crate::commands::common::{ensure_signed_in, format_entry_lines, listing_note, EntryListItem};
use crate::error::CliError;

pub async fn run_list<R: RemoteGateway>(
    ctx: &ClientContext<R>,
    search: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    ensure_signed_in(ctx)?;
    let mut events = ctx.entries().subscribe();
    let mut listing = match search {
        Some(query) => ctx.entries().search_entries(query).await?,
        None => ctx.entries().list_entries().await?,
    };

    // The process exits right after printing, so wait for revalidation and
    // show its result instead of the cached rows.
    if let Some(refresh) = listing.refresh.take() {
        if refresh.await.is_ok() {
            while let Ok(event) = events.try_recv() {
                match event {
                    SyncEvent::EntriesRefreshed { entries, .. } => {
                        listing.entries = match search {
                            Some(query) => filter_entries(&entries, query),
                            None => entries,
                        };
                    }
                    SyncEvent::Warning(warning) => listing.warning = Some(warning),
                    SyncEvent::EntryRefreshed(_) | SyncEvent::EntryRemoved(_) => {}
                }
            }
        }
    }

    if let Some(note) = listing_note(&listing) {
        eprintln!("{note}");
    }
    let favorites = ctx.favorites().favorites().await?;

    if as_json {
        let items = listing
            .entries
            .iter()
            .map(|entry| EntryListItem {
                entry,
                favorite: favorites.contains(&entry.id),
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if listing.entries.is_empty() {
        println!("No entries yet. Add one with `toke add --strain <NAME>`.");
    } else {
        for line in format_entry_lines(&listing.entries, &favorites) {
            println!("{line}");
        }
    }

    Ok(())
}
