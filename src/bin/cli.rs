//! newsvault CLI
//!
//! Local entry point for crawling, searching, and inspecting the article
//! store.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use newsvault::{
    api::NewsService,
    error::{AppError, Result},
    models::Config,
    storage::ArticleFilter,
};

/// newsvault - News Ingestion and Similarity Search
#[derive(Parser, Debug)]
#[command(
    name = "newsvault",
    version,
    about = "Ingests news articles, deduplicates them, and answers similarity queries"
)]
struct Cli {
    /// Path to the data directory (config, store, index)
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl article links from a seeds file or the configured archive
    Crawl {
        /// File with one article link per line
        #[arg(long)]
        seeds: Option<PathBuf>,

        /// Discover links starting from this date (config date format)
        #[arg(long)]
        from: Option<String>,

        /// Discover links up to but not including this date
        #[arg(long)]
        to: Option<String>,
    },

    /// Search stored articles by text similarity
    Search {
        /// Query text
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 10)]
        k: usize,
    },

    /// List stored articles
    List {
        /// Only articles carrying this tag
        #[arg(long)]
        tag: Option<String>,

        /// Only articles with this publication date
        #[arg(long)]
        date: Option<String>,

        /// Page cursor from a previous listing
        #[arg(long)]
        page_token: Option<u64>,

        /// Page size
        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },

    /// Show one article by id
    Show { id: u64 },

    /// Delete an article by id
    Delete { id: u64 },

    /// Rebuild the similarity index from the store
    Reindex,

    /// Validate the configuration file
    Validate,

    /// Show store and crawl status
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.data_dir.join("config.toml");
    let config = Config::load_or_default(&config_path);

    if let Command::Validate = cli.command {
        config.validate()?;
        log::info!("Configuration is valid");
        log::info!("  user agents: {}", config.crawler.user_agents.len());
        log::info!("  timeout: {}s", config.crawler.timeout_secs);
        log::info!("  max concurrent fetches: {}", config.crawler.max_concurrent);
        log::info!("  archive template: {}", config.discovery.archive_url_template);
        return Ok(());
    }

    let service = NewsService::open(config.clone(), &cli.data_dir).await?;

    match cli.command {
        Command::Crawl { seeds, from, to } => {
            let links = match (seeds, from) {
                (Some(path), _) => read_seed_links(&path).await?,
                (None, Some(from)) => {
                    let start = parse_date(&from, &config.discovery.date_format)?;
                    let end = to
                        .map(|t| parse_date(&t, &config.discovery.date_format))
                        .transpose()?;
                    service.discover_links(start, end).await?
                }
                (None, None) => {
                    return Err(AppError::validation(
                        "pass --seeds <file> or --from <date> to select what to crawl",
                    ));
                }
            };

            if links.is_empty() {
                log::warn!("Nothing to crawl");
                return Ok(());
            }

            log::info!("Crawling {} link(s)", links.len());

            // Ctrl-C pauses at the next fetch boundary; the checkpoint makes
            // the next invocation resume where this one stopped.
            let crawl_handle = service.crawl_handle();
            let pause_task = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Interrupt received, pausing crawl");
                    crawl_handle.pause();
                }
            });

            let stats = service.crawl(links).await?;
            pause_task.abort();

            log::info!(
                "Done: {} inserted, {} updated, {} skipped ({} fetch / {} extraction failure(s))",
                stats.inserted,
                stats.updated,
                stats.skipped,
                stats.fetch_failures,
                stats.extraction_failures
            );
        }

        Command::Search { query, k } => {
            let results = service.search(&query, k).await?;
            if results.is_empty() {
                println!("No matching articles.");
            }
            for result in results {
                println!(
                    "{:>6}  {:.4}  {}  {}",
                    result.id,
                    result.score,
                    result.date.as_deref().unwrap_or("-"),
                    result.title
                );
                println!("        {}", result.link);
            }
        }

        Command::List {
            tag,
            date,
            page_token,
            page_size,
        } => {
            let filter = ArticleFilter { tag, date };
            let page = service.list_articles(&filter, page_token, page_size).await?;
            for record in &page.records {
                println!(
                    "{:>6}  {}  {}",
                    record.id,
                    record.date.as_deref().unwrap_or("-"),
                    record.title
                );
            }
            match page.next_page_token {
                Some(token) => println!("-- more: --page-token {token}"),
                None => println!("-- end of listing --"),
            }
        }

        Command::Show { id } => match service.get_article(id).await? {
            Some(record) => {
                println!("id:      {}", record.id);
                println!("link:    {}", record.link);
                println!("title:   {}", record.title);
                println!("date:    {}", record.date.as_deref().unwrap_or("-"));
                println!("author:  {}", record.author.as_deref().unwrap_or("-"));
                println!("tags:    {}", record.tags.join(", "));
                if !record.alternate_links.is_empty() {
                    println!("also at: {}", record.alternate_links.join(", "));
                }
                println!("created: {}", record.created_at);
                println!("updated: {}", record.updated_at);
                println!();
                println!("{}", record.body);
            }
            None => println!("No article with id {id}."),
        },

        Command::Delete { id } => {
            if service.delete_article(id).await? {
                log::info!("Deleted article {}", id);
            } else {
                log::warn!("No article with id {}", id);
            }
        }

        Command::Reindex => {
            service.rebuild_index().await?;
            log::info!("Similarity index rebuilt");
        }

        Command::Info => {
            let status = service.status();
            println!("articles:  {}", service.article_count().await?);
            println!("state:     {:?}", status.state);
            println!("processed: {}", status.processed);
            if let Some(link) = status.last_link {
                println!("last link: {}", link);
            }
            if let Some(error) = status.last_error {
                println!("last error: {}", error);
            }
        }

        Command::Validate => unreachable!("handled above"),
    }

    Ok(())
}

/// Read seed links from a file, one per line, skipping blanks and comments.
async fn read_seed_links(path: &PathBuf) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

fn parse_date(raw: &str, format: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, format).map_err(|_| {
        AppError::validation(format!("invalid date '{raw}' (expected format {format})"))
    })
}
