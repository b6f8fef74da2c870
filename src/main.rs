use anyhow::Result;
use clap::{Parser, Subcommand};
use proxy_harvest::{
    proxy::{load_sources, CrawlerConfig, ProxyRecord},
    Config, HarvestConfig, Harvester,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Harvest proxies from web sources into a local store
#[derive(Parser)]
#[command(name = "proxy-harvest")]
#[command(about = "Harvest proxies from web sources into a local store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file path
    #[arg(short, long, default_value = "proxies.db")]
    database: String,

    /// Bucket holding the proxies
    #[arg(short, long, default_value = "proxies")]
    bucket: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect proxies from the configured sources
    Harvest {
        /// JSON file with the source specifications
        #[arg(short, long)]
        sources: PathBuf,
        /// Number of sources collected concurrently
        #[arg(short = 'n', long, default_value = "4")]
        concurrency: usize,
        /// Timeout in seconds for HTTP requests
        #[arg(long, default_value = "30")]
        timeout: u64,
        /// Fixed user agent instead of a random browser one
        #[arg(long)]
        user_agent: Option<String>,
    },
    /// List stored proxies
    List,
    /// Print one random stored proxy
    Random,
    /// Delete a proxy by IP:PORT key
    Delete {
        /// Proxy key
        key: String,
    },
    /// Export every stored proxy as JSON
    Export {
        /// Output file, stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxy_harvest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config {
        database_url: cli.database,
        bucket: cli.bucket,
    };
    let store = config.open_store().await?;

    match cli.command {
        Commands::Harvest {
            sources,
            concurrency,
            timeout,
            user_agent,
        } => {
            let specs = load_sources(&sources)?;
            println!("Loaded {} sources from {:?}", specs.len(), sources);

            let mut crawler = CrawlerConfig::new().with_timeout(Duration::from_secs(timeout));
            if let Some(agent) = user_agent {
                crawler = crawler.with_user_agent(agent);
            }

            let store = Arc::new(store);
            let harvester = Harvester::new(
                Arc::clone(&store),
                crawler,
                HarvestConfig::new().with_concurrency(concurrency),
            );
            let summary = harvester.run(&specs).await;
            drop(harvester);

            println!(
                "Pages: {} ({} failed), accepted: {}, new: {}, stored total: {}",
                summary.pages,
                summary.failed_pages,
                summary.accepted,
                summary.added,
                store.len()
            );

            if let Ok(store) = Arc::try_unwrap(store) {
                store.close().await;
            }
        }
        Commands::List => {
            let records = decode_all(&store);
            if records.is_empty() {
                println!("No proxies stored.");
            } else {
                for record in &records {
                    println!("{}  {}", record.candidate, record.collected_at.to_rfc3339());
                }
            }
            store.close().await;
        }
        Commands::Random => {
            match store.get_random_one() {
                Some(bytes) => {
                    let record: ProxyRecord = serde_json::from_slice(&bytes)?;
                    println!("{}", record.candidate.url());
                }
                None => eprintln!("No proxies stored."),
            }
            store.close().await;
        }
        Commands::Delete { key } => {
            if store.delete(&key).await? {
                println!("Proxy deleted: {}", key);
            } else {
                eprintln!("Proxy not found: {}", key);
            }
            store.close().await;
        }
        Commands::Export { output } => {
            let records = decode_all(&store);
            let json = serde_json::to_string_pretty(&records)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Exported {} proxies to {:?}", records.len(), path);
                }
                None => println!("{}", json),
            }
            store.close().await;
        }
    }

    Ok(())
}

/// Decode every stored record, skipping entries written by something else
fn decode_all(store: &proxy_harvest::MirroredStore) -> Vec<ProxyRecord> {
    let mut records: Vec<ProxyRecord> = store
        .get_all()
        .values()
        .filter_map(|bytes| serde_json::from_slice(bytes).ok())
        .collect();
    records.sort_by_key(|r| r.key());
    records
}
