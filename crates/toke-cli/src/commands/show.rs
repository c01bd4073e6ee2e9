use toke_core::remote::RemoteGateway;
use toke_core::ClientContext;

use crate::commands::common::{ensure_signed_in, format_entry_detail, parse_entry_id, EntryListItem};
use crate::error::CliError;

pub async fn run_show<R: RemoteGateway>(
    ctx: &ClientContext<R>,
    id: &str,
    as_json: bool,
) -> Result<(), CliError> {
    ensure_signed_in(ctx)?;
    let id = parse_entry_id(id)?;
    let mut view = ctx.entries().get_entry(&id).await?;
    if let Some(refresh) = view.refresh.take() {
        // Let the cache catch up before exiting; the cached row is still shown.
        let _ = refresh.await;
    }
    let favorite = ctx.favorites().is_favorite(&id).await?;

    if as_json {
        let item = EntryListItem {
            entry: &view.entry,
            favorite,
        };
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        for line in format_entry_detail(&view.entry, favorite) {
            println!("{line}");
        }
    }
    Ok(())
}
