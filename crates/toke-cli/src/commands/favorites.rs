use toke_core::remote::RemoteGateway;
use toke_core::ClientContext;

use crate::commands::common::{ensure_signed_in, parse_entry_id};
use crate::error::CliError;

pub async fn run_fav<R: RemoteGateway>(ctx: &ClientContext<R>, id: &str) -> Result<(), CliError> {
    ensure_signed_in(ctx)?;
    let id = parse_entry_id(id)?;
    if ctx.favorites().toggle_favorite(&id).await? {
        println!("Added {id} to favorites");
    } else {
        println!("Removed {id} from favorites");
    }
    Ok(())
}

pub async fn run_favs<R: RemoteGateway>(
    ctx: &ClientContext<R>,
    as_json: bool,
) -> Result<(), CliError> {
    ensure_signed_in(ctx)?;
    let favorites = ctx.favorites().favorites().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&favorites)?);
    } else {
        for id in &favorites {
            println!("{id}");
        }
    }
    Ok(())
}
