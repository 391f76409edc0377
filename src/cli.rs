/// CLI Module
///
/// Command-line interface configuration using clap.
use clap::Parser;
use std::time::Duration;

/// Ledger History Ingester
///
/// Fetch ledgers from a backend and record one history row per ledger in PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "ledger-history-ingester")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// First ledger to ingest (defaults to one past the latest ingested ledger)
    #[arg(short = 's', long, value_name = "SEQUENCE")]
    pub start_ledger: Option<u32>,

    /// Last ledger to ingest (defaults to following the backend tip)
    #[arg(short = 'e', long, value_name = "SEQUENCE")]
    pub end_ledger: Option<u32>,

    /// Number of ledgers to ingest (alternative to specifying end_ledger)
    #[arg(short = 'n', long, value_name = "COUNT", conflicts_with = "end_ledger")]
    pub num_ledgers: Option<u32>,

    /// Ledger backend URL (overrides LEDGER_BACKEND_URL env var)
    #[arg(short = 'b', long, value_name = "URL")]
    pub backend_url: Option<String>,

    /// Core database URL to read ledgers from instead of the HTTP backend (overrides CORE_DATABASE_URL env var)
    #[arg(long, value_name = "URL", conflicts_with = "backend_url")]
    pub core_database_url: Option<String>,

    /// History database URL (overrides DATABASE_URL env var)
    #[arg(short = 'd', long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Maximum number of pooled history database connections
    #[arg(long, value_name = "COUNT", default_value = "5")]
    pub max_connections: u32,

    /// Maximum number of attempts per ledger
    #[arg(long, value_name = "COUNT", default_value = "3")]
    pub max_retries: usize,

    /// Retry delay in seconds
    #[arg(long, value_name = "SECONDS", default_value = "2")]
    pub retry_delay: u64,

    /// Interval between polls for a ledger that is not available yet, in seconds
    #[arg(long, value_name = "SECONDS", default_value = "1")]
    pub poll_interval: u64,

    /// Timeout for a single ledger fetch, in seconds
    #[arg(long, value_name = "SECONDS", default_value = "30")]
    pub fetch_timeout: u64,

    /// Skip running database migrations on startup
    #[arg(long)]
    pub skip_migrations: bool,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if let (Some(start), Some(end)) = (self.start_ledger, self.end_ledger) {
            if start > end {
                anyhow::bail!("Start ledger ({}) must be less than or equal to end ledger ({})", start, end);
            }
        }

        if self.start_ledger == Some(0) {
            anyhow::bail!("Ledger sequences start at 1");
        }

        if self.num_ledgers == Some(0) {
            anyhow::bail!("Number of ledgers must be greater than 0");
        }

        if self.max_connections == 0 {
            anyhow::bail!("Max connections must be greater than 0");
        }

        if self.max_retries == 0 {
            anyhow::bail!("Max retries must be greater than 0");
        }

        if self.fetch_timeout == 0 {
            anyhow::bail!("Fetch timeout must be greater than 0");
        }

        Ok(())
    }

    /// Calculate end ledger based on start ledger and num_ledgers
    pub fn calculate_end_ledger(&self, start_ledger: u32) -> Option<u32> {
        if let Some(num) = self.num_ledgers {
            Some(start_ledger.saturating_add(num - 1))
        } else {
            self.end_ledger
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(start: Option<u32>, end: Option<u32>, num: Option<u32>) -> Cli {
        Cli {
            start_ledger: start,
            end_ledger: end,
            num_ledgers: num,
            backend_url: None,
            core_database_url: None,
            database_url: None,
            max_connections: 5,
            max_retries: 3,
            retry_delay: 2,
            poll_interval: 1,
            fetch_timeout: 30,
            skip_migrations: false,
        }
    }

    #[test]
    fn test_calculate_end_ledger() {
        assert_eq!(cli(Some(1000), None, Some(5)).calculate_end_ledger(1000), Some(1004));
        assert_eq!(cli(Some(1000), Some(1200), None).calculate_end_ledger(1000), Some(1200));
        assert_eq!(cli(None, None, None).calculate_end_ledger(7), None);
    }

    #[test]
    fn test_validation() {
        assert!(cli(Some(1000), Some(900), None).validate().is_err());
        assert!(cli(Some(0), None, None).validate().is_err());
        assert!(cli(None, None, Some(0)).validate().is_err());
        assert!(cli(Some(10), Some(20), None).validate().is_ok());
    }

    #[test]
    fn test_parse_args() {
        let args = ["ledger-history-ingester", "-s", "5", "-n", "10", "--max-retries", "4"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.start_ledger, Some(5));
        assert_eq!(cli.calculate_end_ledger(5), Some(14));
        assert_eq!(cli.max_retries, 4);
        assert_eq!(cli.retry_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_num_conflicts_with_end() {
        assert!(Cli::try_parse_from(["ledger-history-ingester", "-e", "5", "-n", "10"]).is_err());
    }
}
