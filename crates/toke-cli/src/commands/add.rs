use toke_core::remote::RemoteGateway;
use toke_core::ClientContext;

use crate::cli::AddArgs;
use crate::commands::common::{build_draft, ensure_signed_in, image_extension};
use crate::error::CliError;

pub async fn run_add<R: RemoteGateway>(
    ctx: &ClientContext<R>,
    args: &AddArgs,
) -> Result<(), CliError> {
    ensure_signed_in(ctx)?;
    let draft = build_draft(args)?;
    let image = match &args.image {
        Some(path) => Some((tokio::fs::read(path).await?, image_extension(path))),
        None => None,
    };

    let mut entry = ctx.entries().create_entry(draft).await?;
    if let Some((bytes, extension)) = image {
        entry = ctx
            .entries()
            .attach_image(&entry.id, bytes, &extension)
            .await?;
    }

    println!("{}", entry.id);
    Ok(())
}
