use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use imicrobe_loader::cache::AnnotationCache;
use imicrobe_loader::config::{ConfigLoader, ResolvedConfig};
use imicrobe_loader::domain::{EvidenceSource, SourceKind};
use imicrobe_loader::error::LoaderError;
use imicrobe_loader::fetcher::BatchFetcher;
use imicrobe_loader::ingest::{IngestReport, Ingestor, KindCount, ProgressSink, SampleOutcome};
use imicrobe_loader::kegg::KeggHttpClient;
use imicrobe_loader::output::{
    ConsoleOutput, ImportResult, JsonOutput, ListResult, OutputMode, SchemaResult,
};
use imicrobe_loader::reference::{ReferenceHttpClient, ensure_reference_file, import_pfam_file};
use imicrobe_loader::samples::{DirectorySampleSource, job_commands};
use imicrobe_loader::store::SqliteStore;

#[derive(Parser)]
#[command(name = "imicrobe-load")]
#[command(about = "Load UProC KEGG/PFAM results into the iMicrobe sample warehouse")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// SQLite database file. Overrides the config file.
    #[arg(long, global = true, env = "IMICROBE_DB")]
    db: Option<String>,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create annotation and results tables")]
    CreateSchema,
    #[command(about = "Drop tables (both groups when no flag is given)")]
    DropSchema {
        #[arg(long)]
        results: bool,
        #[arg(long)]
        annotations: bool,
    },
    #[command(about = "Import PFAM families from pfamA.txt.gz")]
    ImportPfam {
        #[arg(long)]
        file: Option<String>,
        /// Download the file first when it is not on disk.
        #[arg(long)]
        download: bool,
    },
    #[command(about = "Load every sample under a results tree")]
    Ingest {
        #[arg(long)]
        root: String,
        #[arg(long)]
        sample_limit: Option<usize>,
        #[arg(long)]
        evidence: Option<EvidenceSource>,
    },
    #[command(about = "Load one UProC result file")]
    IngestFile {
        path: String,
        #[arg(long)]
        evidence: Option<EvidenceSource>,
    },
    #[command(about = "List loaded sample associations")]
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    #[command(about = "Print one ingest-file command per result file")]
    Jobs {
        #[arg(long)]
        root: String,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<LoaderError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &LoaderError) -> u8 {
    match error {
        LoaderError::MissingConfig(_)
        | LoaderError::ConfigRead(_)
        | LoaderError::ConfigParse(_) => 2,
        LoaderError::StoreUnavailable(_)
        | LoaderError::ServiceHttp(_)
        | LoaderError::ServiceUnavailable { .. }
        | LoaderError::ServiceMalformed(_)
        | LoaderError::ReferenceHttp(_)
        | LoaderError::ReferenceStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let database = cli.db.map(Utf8PathBuf::from);
    let config = ConfigLoader::resolve(cli.config.as_deref())?.with_database(database.as_deref());
    tracing::debug!(database = %config.database, "resolved config");

    match cli.command {
        Commands::CreateSchema => {
            let store = SqliteStore::open(&config.database)?;
            store.create_schema()?;
            print_schema(output_mode, "created schema")
        }
        Commands::DropSchema {
            results,
            annotations,
        } => {
            let store = SqliteStore::open(&config.database)?;
            if annotations || !results {
                store.drop_annotation_tables()?;
                print_schema(output_mode, "dropped annotation and results tables")
            } else {
                store.drop_results_tables()?;
                print_schema(output_mode, "dropped results tables")
            }
        }
        Commands::ImportPfam { file, download } => run_import(&config, file, download, output_mode),
        Commands::Ingest {
            root,
            sample_limit,
            evidence,
        } => {
            let source = DirectorySampleSource::new(root)?
                .with_sample_limit(sample_limit.or(config.sample_limit));
            let mut ingestor = build_ingestor(&config, evidence)?;
            let sink: &dyn ProgressSink = match output_mode {
                OutputMode::NonInteractive => &JsonOutput,
                OutputMode::Interactive => &ConsoleOutput,
            };
            match ingestor.ingest_source(&source, sink) {
                Ok(samples) => print_report(output_mode, &ingestor, samples),
                Err(err) => {
                    // Partial progress before the fatal error.
                    print_report(output_mode, &ingestor, Vec::new())?;
                    Err(err.into())
                }
            }
        }
        Commands::IngestFile { path, evidence } => {
            let mut ingestor = build_ingestor(&config, evidence)?;
            let outcome = ingestor.ingest_file(&Utf8PathBuf::from(path))?;
            print_sample(output_mode, &outcome)
        }
        Commands::List { limit } => {
            let store = SqliteStore::open(&config.database)?;
            let result = ListResult {
                associations: store.list_associations(limit)?,
            };
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_list(&result).into_diagnostic(),
                OutputMode::Interactive => ConsoleOutput::print_list(&result).into_diagnostic(),
            }
        }
        Commands::Jobs { root } => {
            let source = DirectorySampleSource::new(root)?;
            for command in job_commands(&source, &config.database)? {
                println!("{command}");
            }
            Ok(())
        }
    }
}

fn build_ingestor(
    config: &ResolvedConfig,
    evidence: Option<EvidenceSource>,
) -> miette::Result<Ingestor<SqliteStore, KeggHttpClient>> {
    let store = SqliteStore::open(&config.database)?;
    store.create_schema()?;
    let client = KeggHttpClient::new(&config.kegg_base_url)?;
    let fetcher = BatchFetcher::new(client, config.batch_size, config.failure_policy);
    let ingestor = Ingestor::new(store, fetcher, evidence.unwrap_or(config.evidence_source))?;
    Ok(ingestor)
}

fn run_import(
    config: &ResolvedConfig,
    file: Option<String>,
    download: bool,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let path = file.map(Utf8PathBuf::from).unwrap_or_else(|| config.pfam_file.clone());
    let downloaded = if download {
        let client = ReferenceHttpClient::new()?;
        ensure_reference_file(&client, &config.pfam_url, &path)?
    } else {
        false
    };

    let store = SqliteStore::open(&config.database)?;
    store.create_schema()?;
    let mut cache = AnnotationCache::initialize(&store)?;
    let import = import_pfam_file(&store, &mut cache, &path, config.reference_group_size)?;
    let result = ImportResult { downloaded, import };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_import(&result).into_diagnostic(),
        OutputMode::Interactive => ConsoleOutput::print_import(&result).into_diagnostic(),
    }
}

fn print_report(
    output_mode: OutputMode,
    ingestor: &Ingestor<SqliteStore, KeggHttpClient>,
    samples: Vec<SampleOutcome>,
) -> miette::Result<()> {
    let report = IngestReport {
        summary: ingestor.summary().clone(),
        samples,
        bad_accessions: ingestor.bad_accessions(),
        store_counts: store_counts(ingestor.store()),
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_ingest(&report).into_diagnostic(),
        OutputMode::Interactive => ConsoleOutput::print_ingest(&report).into_diagnostic(),
    }
}

// A store that has gone away yields no counts.
fn store_counts(store: &SqliteStore) -> Vec<KindCount> {
    SourceKind::all()
        .into_iter()
        .filter_map(|kind| {
            let annotations = store.count_annotations(kind).ok()?;
            let associations = store.count_associations_by_kind(kind).ok()?;
            Some(KindCount {
                kind: kind.type_name().to_string(),
                annotations,
                associations,
            })
        })
        .collect()
}

fn print_sample(output_mode: OutputMode, outcome: &SampleOutcome) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_sample(outcome).into_diagnostic(),
        OutputMode::Interactive => ConsoleOutput::print_sample(outcome).into_diagnostic(),
    }
}

fn print_schema(output_mode: OutputMode, action: &str) -> miette::Result<()> {
    let result = SchemaResult {
        action: action.to_string(),
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_schema(&result).into_diagnostic(),
        OutputMode::Interactive => ConsoleOutput::print_schema(&result).into_diagnostic(),
    }
}
