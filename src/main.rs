use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use mailpull::config::SyncArgs;

#[derive(Debug, Parser)]
#[command(name = "mailpull", version, about = "Pull a mailbox into a plain-text corpus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync the configured mailbox into the mail directory
    Sync(SyncArgs),
    /// Search synced records
    Search(SearchArgs),
    /// Summarize synced records
    Summary(CorpusArgs),
    /// Export synced records as JSON for LLM context
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct CorpusArgs {
    #[arg(long, env = "MAIL_DIR", default_value = "mails")]
    mail_dir: PathBuf,
}

#[derive(Debug, Args)]
struct SearchArgs {
    query: String,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    #[command(flatten)]
    corpus: CorpusArgs,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long, default_value = "emails_for_llm.json")]
    output: PathBuf,
    #[arg(long, default_value_t = 100)]
    max: usize,
    #[command(flatten)]
    corpus: CorpusArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use anyhow::{Context, Result};
    use chrono::Utc;
    use tracing::warn;

    use mailpull::config::SyncArgs;
    use mailpull::corpus::Corpus;
    use mailpull::output::{self, OutputFormat};
    use mailpull::sync::SyncOrchestrator;

    use super::{Cli, Commands, CorpusArgs, ExportArgs, SearchArgs};

    pub async fn dispatch(cli: Cli) -> Result<()> {
        match cli.command {
            Commands::Sync(args) => handle_sync(args, cli.json).await,
            Commands::Search(args) => handle_search(args, cli.json),
            Commands::Summary(args) => handle_summary(args, cli.json),
            Commands::Export(args) => handle_export(args, cli.json),
        }
    }

    async fn handle_sync(args: SyncArgs, json: bool) -> Result<()> {
        let config = args.into_config()?;
        let connector = config.connector()?;
        let mut dedup = config.deduplicator()?;

        let orchestrator = SyncOrchestrator::new(config.options(Utc::now()));
        let cancel = orchestrator.cancel_flag();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current message");
                cancel.cancel();
            }
        });

        let report = orchestrator
            .run(connector.as_ref(), &mut dedup)
            .await
            .with_context(|| format!("sync {} mailbox", config.backend_kind()))?;

        let formatted = output::format_sync_report(OutputFormat::from_json_flag(json), &report)?;
        println!("{formatted}");
        Ok(())
    }

    fn handle_search(args: SearchArgs, json: bool) -> Result<()> {
        let corpus = load_corpus(&args.corpus)?;
        let hits = corpus.search(&args.query, args.limit);
        let formatted = output::format_search_results(OutputFormat::from_json_flag(json), &hits)?;
        println!("{formatted}");
        Ok(())
    }

    fn handle_summary(args: CorpusArgs, json: bool) -> Result<()> {
        let corpus = load_corpus(&args)?;
        let formatted = output::format_summary(OutputFormat::from_json_flag(json), &corpus.summary())?;
        println!("{formatted}");
        Ok(())
    }

    fn handle_export(args: ExportArgs, json: bool) -> Result<()> {
        let corpus = load_corpus(&args.corpus)?;
        let written = corpus.export_for_llm(&args.output, args.max)?;
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "path": args.output,
                    "records": written,
                }))?
            );
        } else {
            println!("Exported {written} records to {}", args.output.display());
        }
        Ok(())
    }

    fn load_corpus(args: &CorpusArgs) -> Result<Corpus> {
        Corpus::load(&args.mail_dir)
            .with_context(|| format!("load records from {}", args.mail_dir.display()))
    }
}
