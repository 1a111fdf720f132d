use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use genomehubs_assemblies::app::{
    App, FetchPreviousResult, FetchSummaryResult, ParseOptions, ParseResult, ReportInput,
};
use genomehubs_assemblies::datasets::{DatasetsCli, SequenceSource, SummarySource};
use genomehubs_assemblies::domain::{SequenceSourceKind, TaxonId};
use genomehubs_assemblies::error::ImportError;
use genomehubs_assemblies::ncbi::NcbiHttpClient;
use genomehubs_assemblies::output::{JsonOutput, LogProgress, OutputMode};
use genomehubs_assemblies::reconcile::{ReconcileOptions, SpanFilter};
use genomehubs_assemblies::retry::RetryPolicy;
use genomehubs_assemblies::sequence::SequenceRecord;

#[derive(Parser)]
#[command(name = "gh-assemblies")]
#[command(about = "Reconcile NCBI Datasets assembly reports into GenomeHubs TSV imports")]
#[command(version, author)]
struct Cli {
    /// Print the run summary as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Parse assembly reports into a TSV, reusing unchanged rows")]
    Parse(ParseArgs),
    #[command(about = "Fetch the JSON-lines assembly summary for a root taxon")]
    FetchSummary(FetchSummaryArgs),
    #[command(about = "Copy the previous TSV and its types files into a work directory")]
    FetchPrevious(FetchPreviousArgs),
}

#[derive(Args)]
struct ParseArgs {
    /// JSON-lines assembly reports (may be gzipped).
    #[arg(long, conflicts_with = "root_taxid", required_unless_present = "root_taxid")]
    jsonl: Option<Utf8PathBuf>,

    /// Stream reports for this taxon instead of reading a file.
    #[arg(long)]
    root_taxid: Option<String>,

    /// GoaT types YAML describing the output columns.
    #[arg(long, conflicts_with = "file_stem", required_unless_present = "file_stem")]
    yaml: Option<Utf8PathBuf>,

    /// Shorthand for `--yaml <stem>.types.yaml --features <stem>.features.tsv`.
    #[arg(long)]
    file_stem: Option<String>,

    /// Chromosome feature TSV.
    #[arg(long)]
    features: Option<Utf8PathBuf>,

    /// Organelle TSV.
    #[arg(long)]
    organelles: Option<Utf8PathBuf>,

    #[arg(long, value_enum, default_value_t = SequenceSourceKind::Cli)]
    source: SequenceSourceKind,

    /// Base sequence report timeout in seconds; attempt `n` waits `n + 1` times as long.
    #[arg(long, default_value_t = 120)]
    sequence_timeout: u64,

    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Drop assemblies of this taxon whose span is below `--min-span`.
    #[arg(long, requires = "min_span")]
    filter_taxon: Option<String>,

    #[arg(long, requires = "filter_taxon")]
    min_span: Option<u64>,
}

#[derive(Args)]
struct FetchSummaryArgs {
    #[arg(long)]
    root_taxid: String,

    #[arg(long)]
    output: Utf8PathBuf,

    #[arg(long, default_value_t = 1)]
    min_lines: usize,

    #[arg(long, default_value_t = 2)]
    retries: u32,
}

#[derive(Args)]
struct FetchPreviousArgs {
    #[arg(long)]
    yaml: Utf8PathBuf,

    /// Directory holding the previous run's outputs.
    #[arg(long)]
    remote_dir: Utf8PathBuf,

    #[arg(long, default_value = ".")]
    work_dir: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ImportError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ImportError) -> u8 {
    match error {
        ImportError::ConfigRead(_)
        | ImportError::ConfigParse(_)
        | ImportError::MissingConfigField(_)
        | ImportError::MissingInput(_)
        | ImportError::InvalidTaxonId(_) => 2,
        ImportError::MissingTool(_)
        | ImportError::SequenceFetch(_)
        | ImportError::NcbiHttp(_)
        | ImportError::NcbiStatus { .. }
        | ImportError::SummaryFetch(_)
        | ImportError::SummaryTooShort { .. } => 3,
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
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Parse(args) => run_parse(args, output_mode),
        Commands::FetchSummary(args) => run_fetch_summary(args, output_mode),
        Commands::FetchPrevious(args) => run_fetch_previous(args, output_mode),
    }
}

fn run_parse(args: ParseArgs, output_mode: OutputMode) -> miette::Result<()> {
    let input = match (&args.jsonl, &args.root_taxid) {
        (Some(path), _) => ReportInput::JsonLines(path.clone()),
        (None, Some(taxid)) => ReportInput::Taxon(taxid.parse::<TaxonId>()?),
        (None, None) => return Err(miette::Report::msg("either --jsonl or --root-taxid is required")),
    };
    let (yaml, stem_features) = match (&args.yaml, &args.file_stem) {
        (Some(yaml), _) => (yaml.clone(), None),
        (None, Some(stem)) => (
            Utf8PathBuf::from(format!("{stem}.types.yaml")),
            Some(Utf8PathBuf::from(format!("{stem}.features.tsv"))),
        ),
        (None, None) => return Err(miette::Report::msg("either --yaml or --file-stem is required")),
    };
    let span_filter = match (args.filter_taxon, args.min_span) {
        (Some(taxon), Some(min_span)) => Some(SpanFilter { taxon, min_span }),
        _ => None,
    };
    let options = ParseOptions {
        input,
        yaml,
        feature_path: args.features.or(stem_features),
        organelle_path: args.organelles,
        reconcile: ReconcileOptions {
            base_timeout: Duration::from_secs(args.sequence_timeout),
            retry: RetryPolicy::fixed(args.retries, Duration::ZERO),
            span_filter,
        },
    };

    let result = match args.source {
        SequenceSourceKind::Cli => {
            let app = App::new(DatasetsCli::new(), DatasetsCli::new());
            parse_with(&app, &options)?
        }
        SequenceSourceKind::Api => {
            let ncbi = NcbiHttpClient::new()?;
            let app = App::new(ncbi, DatasetsCli::new());
            parse_with(&app, &options)?
        }
    };

    match output_mode {
        OutputMode::Json => JsonOutput::print_parse(&result).into_diagnostic(),
        OutputMode::Human => {
            print_parse_summary(&result);
            Ok(())
        }
    }
}

fn parse_with<S: SequenceSource, M: SummarySource>(
    app: &App<S, M>,
    options: &ParseOptions,
) -> Result<ParseResult, ImportError> {
    app.parse(options, &LogProgress)
}

fn run_fetch_summary(args: FetchSummaryArgs, output_mode: OutputMode) -> miette::Result<()> {
    let root: TaxonId = args.root_taxid.parse()?;
    let app = App::new(NopSequences, DatasetsCli::new());
    let result = app.fetch_summary(
        &root,
        &args.output,
        args.min_lines,
        RetryPolicy::fixed(args.retries, Duration::from_secs(2)),
        &LogProgress,
    )?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_fetch_summary(&result).into_diagnostic(),
        OutputMode::Human => {
            print_fetch_summary(&result);
            Ok(())
        }
    }
}

fn run_fetch_previous(args: FetchPreviousArgs, output_mode: OutputMode) -> miette::Result<()> {
    let app = App::new(NopSequences, DatasetsCli::new());
    let result = app.fetch_previous(&args.yaml, &args.remote_dir, &args.work_dir, &LogProgress)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_fetch_previous(&result).into_diagnostic(),
        OutputMode::Human => {
            print_fetch_previous(&result);
            Ok(())
        }
    }
}

fn print_parse_summary(result: &ParseResult) {
    println!("{}: {} assemblies", result.output, result.rows);
    println!(
        "  reused {}, processed {}, repeated {}, filtered {}",
        result.stats.reused, result.stats.processed, result.stats.repeated, result.stats.filtered
    );
    println!(
        "  sequence reports: {} applied, {} timed out",
        result.stats.enriched, result.stats.timeouts
    );
    if let Some(path) = &result.feature_file {
        println!("{path}: {} chromosome features", result.stats.feature_rows);
    }
    if let Some(path) = &result.organelle_file {
        println!("{path}: {} organelles", result.organelle_rows);
    }
}

fn print_fetch_summary(result: &FetchSummaryResult) {
    println!("{}: {} lines", result.output, result.lines);
    if !result.skipped.is_empty() {
        println!("  skipped taxa: {}", result.skipped.join(", "));
    }
}

fn print_fetch_previous(result: &FetchPreviousResult) {
    if result.fetched {
        println!("{}: {} lines", result.local_file, result.lines);
    } else {
        println!("no previous file at {}", result.remote_file);
    }
    println!(
        "headers {}",
        if result.headers_match { "match" } else { "differ" }
    );
}

struct NopSequences;

impl SequenceSource for NopSequences {
    fn sequence_report(
        &self,
        _accession: &str,
        _timeout: Duration,
    ) -> Result<Vec<SequenceRecord>, ImportError> {
        Err(ImportError::SequenceFetch("not available".to_string()))
    }
}
