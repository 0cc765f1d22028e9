use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

use score_ingest::app::ports::{CatalogLookup, HttpClientPort, KaiAuth, ScoreStore, TokenStore};
use score_ingest::config::Config;
use score_ingest::domain::{get_gpt_config, Game, ImportType, Playtype};
use score_ingest::infra::{InMemoryCatalog, ReqwestHttp, SqliteStore};
use score_ingest::observability::{init_logging, init_metrics, render};
use score_ingest::pipeline::ingestion::{
    kai_import_context, parse_batch_manual, parse_eamusement_iidx_csv, parse_fervidex, KaiTraversal,
    ParsedImport,
};
use score_ingest::pipeline::orchestrator::{ImportJob, ImportOrchestrator, JobReport};
use score_ingest::pipeline::processing::calculated_data::CalculatedDataEngine;
use score_ingest::pipeline::processing::converters::ConverterRegistry;
use score_ingest::pipeline::processing::insert_queue::InsertQueue;
use score_ingest::pipeline::processing::pb::PbProcessor;
use score_ingest::pipeline::processing::profile::compute_profile_ratings;

#[derive(Parser)]
#[command(name = "score_ingest")]
#[command(about = "Import rhythm game scores from files and score services")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Print Prometheus metrics after the command finishes
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import an uploaded document
    ImportFile {
        #[arg(long)]
        user: u32,
        /// One of file/batch-manual, file/eamusement-iidx-csv, ir/direct-manual, ir/fervidex
        #[arg(long)]
        import_type: String,
        #[arg(long)]
        path: PathBuf,
        /// Playtype of an e-amusement CSV (SP or DP)
        #[arg(long)]
        playtype: Option<String>,
        /// Game version a fervidex payload was submitted from
        #[arg(long)]
        version: Option<String>,
    },
    /// Pull play history from a Kai-like service
    ImportKai {
        #[arg(long)]
        user: u32,
        /// flo or eag
        #[arg(long)]
        service: String,
        /// Only import plays of this playtype (SP or DP)
        #[arg(long)]
        playtype: Option<String>,
    },
    /// Store OAuth tokens for a Kai-like service
    SetKaiToken {
        #[arg(long)]
        user: u32,
        #[arg(long)]
        service: String,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
    },
    /// Print profile ratings derived from stored PBs
    Profile {
        #[arg(long)]
        user: u32,
        #[arg(long)]
        game: String,
        #[arg(long)]
        playtype: String,
    },
}

struct Services {
    store: Arc<SqliteStore>,
    catalog: Arc<dyn CatalogLookup>,
    engine: Arc<CalculatedDataEngine>,
    orchestrator: ImportOrchestrator,
    converters: ConverterRegistry,
}

impl Services {
    fn build(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(
            SqliteStore::open(&config.store.sqlite_path)
                .with_context(|| format!("opening {}", config.store.sqlite_path.display()))?,
        );
        let catalog: Arc<dyn CatalogLookup> = match &config.catalog.seed_path {
            Some(path) => Arc::new(
                InMemoryCatalog::from_seed_file(path)
                    .with_context(|| format!("loading catalog seed {}", path.display()))?,
            ),
            None => Arc::new(InMemoryCatalog::default()),
        };
        let engine = Arc::new(CalculatedDataEngine::new(catalog.clone()));
        let score_store: Arc<dyn ScoreStore> = store.clone();
        let queue = Arc::new(InsertQueue::new(score_store.clone(), config.queue.capacity));
        let orchestrator = ImportOrchestrator::new(catalog.clone(), score_store, queue, engine.clone());

        Ok(Self {
            store,
            catalog,
            engine,
            orchestrator,
            converters: ConverterRegistry::new(),
        })
    }

    async fn run_job(&self, user_id: u32, parsed: ParsedImport) -> anyhow::Result<JobReport> {
        let converter = self
            .converters
            .get(parsed.context.import_type)
            .ok_or_else(|| anyhow!("no converter registered for {}", parsed.context.import_type))?;
        let context = parsed.context.clone();
        self.run(ImportJob {
            user_id,
            context,
            producer: parsed.into_producer(),
            converter,
        })
        .await
    }

    async fn run(&self, job: ImportJob) -> anyhow::Result<JobReport> {
        let user_id = job.user_id;
        let report = self.orchestrator.run(job).await?;

        let pbs = PbProcessor::new(self.store.clone(), self.catalog.clone(), self.engine.clone());
        pbs.process(user_id, &report.chart_ids)
            .await
            .context("updating personal bests")?;
        Ok(report)
    }
}

fn parse_file(
    import_type: ImportType,
    bytes: &[u8],
    playtype: Option<&str>,
    version: Option<&str>,
) -> anyhow::Result<ParsedImport> {
    let parsed = match import_type {
        ImportType::FileBatchManual | ImportType::IrDirectManual => parse_batch_manual(bytes, import_type)?,
        ImportType::FileEamusementIidxCsv => {
            let playtype = playtype
                .and_then(Playtype::parse)
                .ok_or_else(|| anyhow!("--playtype SP or DP is required for {}", import_type))?;
            parse_eamusement_iidx_csv(bytes, playtype)?
        }
        ImportType::IrFervidex => {
            let version = version.ok_or_else(|| anyhow!("--version is required for {}", import_type))?;
            parse_fervidex(bytes, version, Utc::now().timestamp_millis())?
        }
        ImportType::ApiFloIidx | ImportType::ApiEagIidx => {
            return Err(anyhow!("{} is pulled with import-kai, not uploaded", import_type))
        }
    };
    Ok(parsed)
}

fn print_report(report: &JobReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    if let Some(fatal) = &report.fatal {
        println!("❌ Import stopped early: {}", fatal);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    init_logging(&config.logging.dir);
    if config.metrics.enabled || cli.print_metrics {
        init_metrics(config.metrics.listen_addr.as_deref());
    }

    let services = Services::build(&config)?;

    match cli.command {
        Commands::ImportFile {
            user,
            import_type,
            path,
            playtype,
            version,
        } => {
            let import_type = ImportType::parse(&import_type)
                .ok_or_else(|| anyhow!("unknown import type {}", import_type))?;
            let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            println!("📥 Importing {} as {}...", path.display(), import_type);

            let parsed = parse_file(import_type, &bytes, playtype.as_deref(), version.as_deref())?;
            let report = services.run_job(user, parsed).await?;
            print_report(&report)?;
        }
        Commands::ImportKai {
            user,
            service,
            playtype,
        } => {
            let playtype = match playtype {
                Some(pt) => Some(Playtype::parse(&pt).ok_or_else(|| anyhow!("unknown playtype {}", pt))?),
                None => None,
            };
            let import_type = ImportType::ALL
                .into_iter()
                .find(|t| t.kai_service() == Some(service.as_str()))
                .ok_or_else(|| anyhow!("unknown Kai service {}", service))?;
            let kai = config.kai_service(&service)?;
            println!("🔄 Pulling play history from {}...", service);

            let http: Arc<dyn HttpClientPort> = Arc::new(ReqwestHttp::new(kai.timeout_secs)?);
            let tokens: Arc<dyn TokenStore> = services.store.clone();
            let traversal = KaiTraversal::for_user(http, tokens, &service, kai, user).await?;
            let converter = services
                .converters
                .get(import_type)
                .ok_or_else(|| anyhow!("no converter registered for {}", import_type))?;

            let report = services
                .run(ImportJob {
                    user_id: user,
                    context: kai_import_context(import_type, playtype)?,
                    producer: traversal.into_stream(),
                    converter,
                })
                .await?;
            print_report(&report)?;
        }
        Commands::SetKaiToken {
            user,
            service,
            access_token,
            refresh_token,
        } => {
            config.kai_service(&service)?;
            services
                .store
                .save_kai_auth(
                    user,
                    &service,
                    &KaiAuth {
                        access_token,
                        refresh_token,
                    },
                )
                .await?;
            println!("✅ Stored {} credentials for user {}", service, user);
        }
        Commands::Profile { user, game, playtype } => {
            let game = Game::parse(&game).ok_or_else(|| anyhow!("unknown game {}", game))?;
            let playtype = Playtype::parse(&playtype).ok_or_else(|| anyhow!("unknown playtype {}", playtype))?;
            let gpt = get_gpt_config(game, playtype)
                .ok_or_else(|| anyhow!("{} does not support {}", game, playtype))?;

            let pbs = services.store.pbs_for_user(user, game, playtype).await?;
            let ratings = compute_profile_ratings(&pbs, gpt);
            println!("{}", serde_json::to_string_pretty(&ratings)?);
        }
    }

    if let Err(e) = services.orchestrator.queue().flush().await {
        error!("Final queue flush failed: {}", e);
    }
    if cli.print_metrics {
        if let Some(rendered) = render() {
            println!("{}", rendered);
        }
    }
    Ok(())
}
