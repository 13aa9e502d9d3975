//! blacklist - manage the plate blacklist and speed threshold in the SQLite store.

use anyhow::Result;
use clap::{Parser, Subcommand};

use speedtrap::{policy::SqlitePolicyStore, PolicyStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage the speedtrap blacklist and threshold")]
struct Args {
    /// SQLite database shared with speedtrapd.
    #[arg(long, env = "SPEEDTRAP_DB_PATH", default_value = "speedtrap.db")]
    db_path: String,

    /// Threshold reported while none has been stored.
    #[arg(
        long,
        env = "SPEEDTRAP_THRESHOLD_KMH",
        default_value_t = speedtrap::policy::DEFAULT_THRESHOLD_KMH
    )]
    default_threshold: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a plate (spaces are ignored).
    Add {
        numberplate: String,
        #[arg(long, default_value = speedtrap::policy::DEFAULT_BLACKLIST_REASON)]
        reason: String,
    },
    /// Remove a plate.
    Remove { numberplate: String },
    /// List blacklisted plates.
    List,
    /// Show the threshold, or set it when a value is given.
    Threshold { kmh: Option<f64> },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let store =
        SqlitePolicyStore::open(&args.db_path)?.with_default_threshold(args.default_threshold)?;

    match args.command {
        Command::Add { numberplate, reason } => {
            if store.add_with_reason(&numberplate, &reason)? {
                println!("added {}", speedtrap::canonicalize_plate(&numberplate));
            } else {
                println!("already listed");
            }
        }
        Command::Remove { numberplate } => {
            if store.remove(&numberplate)? {
                println!("removed {}", speedtrap::canonicalize_plate(&numberplate));
            } else {
                println!("not listed");
            }
        }
        Command::List => {
            for plate in store.list()? {
                println!("{plate}");
            }
        }
        Command::Threshold { kmh: Some(kmh) } => {
            store.set_threshold(kmh)?;
            println!("threshold set to {kmh} km/h");
        }
        Command::Threshold { kmh: None } => {
            println!("{} km/h", store.threshold()?);
        }
    }
    Ok(())
}
