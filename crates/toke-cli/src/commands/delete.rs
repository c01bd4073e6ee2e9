use toke_core::remote::RemoteGateway;
use toke_core::ClientContext;

use crate::commands::common::{ensure_signed_in, parse_entry_id};
use crate::error::CliError;

pub async fn run_delete<R: RemoteGateway>(ctx: &ClientContext<R>, id: &str) -> Result<(), CliError> {
    ensure_signed_in(ctx)?;
    let id = parse_entry_id(id)?;
    ctx.entries().delete_entry(&id).await?;
    println!("{id}");
    Ok(())
}
