use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "toke")]
#[command(about = "Keep your strain journal from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional JSON config file (values override the environment)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the local cache directory
    #[arg(long, global = true, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in, sign up, or sign out
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// List journal entries, newest first
    List {
        /// Only show entries whose strain or brand matches
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one entry
    Show {
        /// Entry ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a new entry
    #[command(alias = "new")]
    Add(AddArgs),
    /// Delete an entry
    Delete {
        /// Entry ID
        id: String,
    },
    /// Toggle an entry in your favorites
    Fav {
        /// Entry ID
        id: String,
    },
    /// List favorite entry IDs
    Favs {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct AddArgs {
    /// Strain name
    #[arg(long)]
    pub strain: String,
    /// Brand or grower
    #[arg(long)]
    pub brand: Option<String>,
    /// flower, concentrate, or edible
    #[arg(long = "type", value_name = "TYPE", default_value = "flower")]
    pub strain_type: String,
    /// Amount purchased
    #[arg(long, default_value_t = 0.0)]
    pub size: f64,
    /// Unit for --size (g, oz, mg, ml, each)
    #[arg(long, default_value = "g")]
    pub unit: String,
    /// Price paid
    #[arg(long, default_value_t = 0.0)]
    pub cost: f64,
    /// High rating, 0-10
    #[arg(long, default_value_t = 0.0)]
    pub high: f64,
    /// Flavor rating, 0-10
    #[arg(long, default_value_t = 0.0)]
    pub flavor: f64,
    /// Notes on the high
    #[arg(long)]
    pub high_notes: Option<String>,
    /// Notes on the flavor
    #[arg(long)]
    pub flavor_notes: Option<String>,
    /// Tasting date (YYYY-MM-DD or RFC 3339); defaults to now
    #[arg(long)]
    pub date: Option<String>,
    /// Photo to attach
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in with email and password
    Login {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Create an account
    Signup {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show who is signed in
    Status,
    /// Sign out and clear local data for the account
    Logout,
}
