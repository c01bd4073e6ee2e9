use toke_core::remote::{RemoteGateway, SignUpOutcome};
use toke_core::ClientContext;

use crate::cli::AuthCommands;
use crate::error::CliError;

pub async fn run_auth<R: RemoteGateway>(
    ctx: &ClientContext<R>,
    command: AuthCommands,
) -> Result<(), CliError> {
    match command {
        AuthCommands::Login { email, password } => {
            let session = ctx.session().sign_in(&email, &password).await?;
            let email_label = session.user.email.as_deref().unwrap_or("(no email)");
            println!("Signed in as {email_label}");
        }
        AuthCommands::Signup { email, password } => {
            match ctx.session().sign_up(&email, &password).await? {
                SignUpOutcome::SignedIn(session) => {
                    let email_label = session.user.email.as_deref().unwrap_or("(no email)");
                    println!("Account created; signed in as {email_label}");
                }
                SignUpOutcome::ConfirmationRequired => {
                    println!("Account created. Confirm your email, then run `toke auth login`.");
                }
            }
        }
        AuthCommands::Status => match ctx.session().current_user().await {
            Some(user) => {
                let email_label = user.email.as_deref().unwrap_or("(no email)");
                println!("Signed in as {email_label} ({})", ctx.session().state());
            }
            None => println!("Not signed in."),
        },
        AuthCommands::Logout => {
            ctx.session().sign_out().await;
            println!("Signed out");
        }
    }
    Ok(())
}
