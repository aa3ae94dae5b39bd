use clap::Parser;

use crate::fpl::models::EntryId;

/// Fantasy Premier League live scoring engine
#[derive(Parser, Debug, Clone)]
#[command(name = "fpl-live", version, about)]
pub struct Config {
    /// FPL API base URL
    #[arg(
        long,
        env = "FPL_API_URL",
        default_value = "https://fantasy.premierleague.com/api"
    )]
    pub api_url: String,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "fpl-live.db")]
    pub database_path: String,

    /// Manager entry ids to score, comma-separated
    #[arg(long, env = "ENTRY_IDS", value_delimiter = ',')]
    pub entry_ids: Vec<EntryId>,

    /// Polling interval while matches are live, in seconds
    #[arg(long, env = "LIVE_POLL_SECS", default_value = "30")]
    pub live_poll_secs: u64,

    /// Polling interval between the deadline and first kickoff, in seconds
    #[arg(long, env = "PREMATCH_POLL_SECS", default_value = "120")]
    pub prematch_poll_secs: u64,

    /// Maximum number of entries kept in the chronological event log
    #[arg(long, env = "MAX_EVENT_LOG", default_value = "500")]
    pub max_event_log: usize,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.entry_ids.is_empty() {
            anyhow::bail!("at least one entry id is required (--entry-ids or ENTRY_IDS)");
        }
        if self.live_poll_secs == 0 || self.prematch_poll_secs == 0 {
            anyhow::bail!("polling intervals must be positive");
        }
        if self.max_event_log == 0 {
            anyhow::bail!("max_event_log must be positive");
        }
        Ok(())
    }
}
