//! violation_stats - print aggregate violation statistics as JSON.

use anyhow::Result;
use clap::Parser;

use speedtrap::SqliteViolationStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "Print speedtrap violation statistics")]
struct Args {
    /// SQLite database written by speedtrapd.
    #[arg(long, env = "SPEEDTRAP_DB_PATH", default_value = "speedtrap.db")]
    db_path: String,

    /// Also print the most recent records.
    #[arg(long, default_value_t = 0)]
    recent: usize,

    /// Pretty-print JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let store = SqliteViolationStore::open(&args.db_path)?;

    let stats = store.stats()?;
    let output = if args.recent > 0 {
        serde_json::json!({ "stats": stats, "recent": store.recent(args.recent)? })
    } else {
        serde_json::to_value(&stats)?
    };
    let text = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{text}");
    Ok(())
}
