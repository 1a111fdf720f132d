use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, Cursor};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ConfigLoader, ResolvedConfig};
use crate::datasets::{SequenceSource, SummarySource};
use crate::domain::TaxonId;
use crate::error::ImportError;
use crate::fs_util;
use crate::reconcile::{ReconcileOptions, ReconcileStats, Reconciler};
use crate::report::ReportReader;
use crate::retry::RetryPolicy;
use crate::tsv::{self, Row, TsvAppender};

const GENBANK_ACCESSION: &str = "genbankAccession";
const ASSEMBLY_ID: &str = "assembly_id";
const PROGRESS_EVERY: usize = 1000;

/// Where assembly reports are read from.
#[derive(Debug, Clone)]
pub enum ReportInput {
    /// A JSON-lines file, optionally gzip-compressed.
    JsonLines(Utf8PathBuf),
    /// Streamed from `datasets summary genome taxon` for a root taxon.
    Taxon(TaxonId),
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub input: ReportInput,
    pub yaml: Utf8PathBuf,
    pub feature_path: Option<Utf8PathBuf>,
    pub organelle_path: Option<Utf8PathBuf>,
    pub reconcile: ReconcileOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseResult {
    pub output: String,
    pub rows: usize,
    pub feature_file: Option<String>,
    pub organelle_file: Option<String>,
    pub organelle_rows: usize,
    pub previous_rows: usize,
    pub stats: ReconcileStats,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSummaryResult {
    pub output: String,
    pub taxa: Vec<String>,
    pub skipped: Vec<String>,
    pub lines: usize,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchPreviousResult {
    pub local_file: String,
    pub remote_file: String,
    pub fetched: bool,
    pub lines: usize,
    pub copied: Vec<String>,
    pub headers_match: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<S: SequenceSource, M: SummarySource> {
    sequences: S,
    summaries: M,
}

impl<S: SequenceSource, M: SummarySource> App<S, M> {
    pub fn new(sequences: S, summaries: M) -> Self {
        Self {
            sequences,
            summaries,
        }
    }

    /// Reconciles assembly reports against the previous output and writes
    /// the assembly, feature and organelle TSVs. A failure leaves a
    /// `.failed` sentinel next to the output.
    pub fn parse(
        &self,
        options: &ParseOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ParseResult, ImportError> {
        let config = ConfigLoader::resolve(&options.yaml, options.feature_path.as_deref())?;
        match self.run_parse(&config, options, sink) {
            Ok(result) => {
                if fs_util::clear_failed(&config.output_path)? {
                    info!("removed stale sentinel for {}", config.output_path);
                }
                Ok(result)
            }
            Err(err) => {
                if let Err(mark_err) = fs_util::mark_failed(&config.output_path, &err.to_string()) {
                    warn!("could not write failure sentinel: {mark_err}");
                }
                Err(err)
            }
        }
    }

    fn run_parse(
        &self,
        config: &ResolvedConfig,
        options: &ParseOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ParseResult, ImportError> {
        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; loading previous rows from {}", config.output_path),
            elapsed: None,
        });
        let previous = load_previous(&config.output_path, &config.headers, GENBANK_ACCESSION)?;
        let previous_rows = previous.len();

        // Previous features are read before the feature file is truncated.
        let feature_headers = ResolvedConfig::feature_headers();
        let mut previous_features = IndexMap::new();
        let mut appender = None;
        if let Some(path) = &config.feature_path {
            previous_features = load_previous_grouped(path, &feature_headers)?;
            tsv::init_tsv(path.as_std_path(), &feature_headers)?;
            appender = Some(TsvAppender::open(
                path.as_std_path(),
                feature_headers.clone(),
                HashMap::new(),
            )?);
        }

        sink.event(ProgressEvent {
            message: "phase=Reconcile; processing assembly reports".to_string(),
            elapsed: None,
        });
        let reconciled = {
            let mut reconciler =
                Reconciler::new(config, &self.sequences, options.reconcile.clone())
                    .with_previous(previous, previous_features);
            if let Some(appender) = appender.as_mut() {
                reconciler = reconciler.with_features(appender);
            }
            self.for_each_report(&options.input, |report| {
                reconciler.process(report)?;
                let seen = reconciler.stats().reports;
                if seen % PROGRESS_EVERY == 0 {
                    sink.event(ProgressEvent {
                        message: format!("reconcile.progress reports={seen}"),
                        elapsed: Some(start.elapsed()),
                    });
                }
                Ok(())
            })?;
            reconciler.finish()
        };
        if let Some(appender) = appender {
            appender.finish()?;
        }

        sink.event(ProgressEvent {
            message: format!("phase=Store; writing {}", config.output_path),
            elapsed: Some(start.elapsed()),
        });
        let rows = tsv::write_tsv(
            config.output_path.as_std_path(),
            &config.headers,
            reconciled.rows.values(),
            &config.separators,
        )?;

        let mut organelle_rows = 0;
        if let Some(path) = &options.organelle_path {
            organelle_rows = tsv::write_tsv(
                path.as_std_path(),
                &ResolvedConfig::organelle_headers(),
                reconciled.organelles.iter(),
                &HashMap::new(),
            )?;
        }

        info!(
            "wrote {rows} assemblies to {} ({} reused, {} processed, {} timeouts)",
            config.output_path,
            reconciled.stats.reused,
            reconciled.stats.processed,
            reconciled.stats.timeouts
        );
        Ok(ParseResult {
            output: config.output_path.to_string(),
            rows,
            feature_file: config.feature_path.as_ref().map(|path| path.to_string()),
            organelle_file: options.organelle_path.as_ref().map(|path| path.to_string()),
            organelle_rows,
            previous_rows,
            stats: reconciled.stats,
            finished_at: iso_timestamp(),
        })
    }

    fn for_each_report<F>(&self, input: &ReportInput, mut handle: F) -> Result<(), ImportError>
    where
        F: FnMut(crate::report::AssemblyReport) -> Result<(), ImportError>,
    {
        match input {
            ReportInput::JsonLines(path) => {
                let reader = tsv::open_reader(path.as_std_path())?;
                read_reports(reader, &mut handle)
            }
            ReportInput::Taxon(root) => {
                let taxa = root.summary_taxa();
                let several = taxa.len() > 1;
                for taxon in &taxa {
                    let text = match self.summaries.genome_summary(taxon) {
                        Ok(text) => text,
                        Err(err) if several => {
                            warn!("skipping taxon {taxon}: {err}");
                            continue;
                        }
                        Err(err) => return Err(err),
                    };
                    read_reports(Cursor::new(text), &mut handle)?;
                }
                Ok(())
            }
        }
    }

    /// Writes the JSON-lines assembly summary for `root` to `output`.
    pub fn fetch_summary(
        &self,
        root: &TaxonId,
        output: &Utf8Path,
        min_lines: usize,
        retry: RetryPolicy,
        sink: &dyn ProgressSink,
    ) -> Result<FetchSummaryResult, ImportError> {
        let taxa = root.summary_taxa();
        let several = taxa.len() > 1;
        retry.run(&format!("datasets summary for taxon {root}"), |_| {
            let start = Instant::now();
            let mut content = String::new();
            let mut skipped = Vec::new();
            for taxon in &taxa {
                sink.event(ProgressEvent {
                    message: format!("datasets.request taxon={taxon}"),
                    elapsed: None,
                });
                match self.summaries.genome_summary(taxon) {
                    Ok(text) => {
                        content.push_str(&text);
                        if !text.is_empty() && !text.ends_with('\n') {
                            content.push('\n');
                        }
                    }
                    Err(err) if several => {
                        warn!("skipping taxon {taxon}: {err}");
                        skipped.push(taxon.to_string());
                    }
                    Err(err) => return Err(err),
                }
            }
            fs_util::write_atomic(output, content.as_bytes())?;
            let lines = content.lines().count();
            sink.event(ProgressEvent {
                message: format!("datasets.response lines={lines}"),
                elapsed: Some(start.elapsed()),
            });
            if lines < min_lines {
                return Err(ImportError::SummaryTooShort {
                    path: output.as_std_path().to_path_buf(),
                    lines,
                    min_lines,
                });
            }
            Ok(FetchSummaryResult {
                output: output.to_string(),
                taxa: taxa.iter().map(TaxonId::to_string).collect(),
                skipped,
                lines,
                finished_at: iso_timestamp(),
            })
        })
    }

    /// Copies the previous run's TSV and the types files it depends on into
    /// `work_dir`, and reports whether its header row is still current.
    pub fn fetch_previous(
        &self,
        yaml: &Utf8Path,
        remote_dir: &Utf8Path,
        work_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<FetchPreviousResult, ImportError> {
        let config = ConfigLoader::resolve(yaml, None)?;
        fs::create_dir_all(work_dir.as_std_path())
            .map_err(|err| ImportError::Filesystem(format!("create {work_dir}: {err}")))?;

        let local_file = work_dir.join(&config.file_name);
        let remote_file = remote_dir.join(&config.file_name);
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; previous file {remote_file}"),
            elapsed: None,
        });

        let mut fetched = false;
        let mut lines = 0;
        if remote_file.as_std_path().is_file() {
            fs_util::copy_file_atomic(&remote_file, &local_file)?;
            lines = tsv::count_lines(local_file.as_std_path())?;
            fetched = true;
            info!("fetched {remote_file} ({lines} lines)");
        } else {
            warn!("no previous file at {remote_file}");
        }

        let copied = copy_types_files(&config, work_dir)?;
        let headers_match = tsv::headers_match(local_file.as_std_path(), &config.headers);
        if fetched && !headers_match {
            warn!("headers in {local_file} differ from {}", config.yaml_path);
        }

        Ok(FetchPreviousResult {
            local_file: local_file.to_string(),
            remote_file: remote_file.to_string(),
            fetched,
            lines,
            copied,
            headers_match,
        })
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn read_reports<R, F>(reader: R, handle: &mut F) -> Result<(), ImportError>
where
    R: BufRead,
    F: FnMut(crate::report::AssemblyReport) -> Result<(), ImportError>,
{
    for report in ReportReader::new(reader) {
        handle(report?)?;
    }
    Ok(())
}

/// Previous rows keyed by `key`. A missing file or a stale header row is
/// treated as no previous run.
pub fn load_previous(
    path: &Utf8Path,
    headers: &[String],
    key: &str,
) -> Result<IndexMap<String, Row>, ImportError> {
    match tsv::load_keyed(path.as_std_path(), headers, key) {
        Err(ImportError::HeaderMismatch { path }) => {
            warn!(
                "ignoring previous file {}: headers do not match",
                path.display()
            );
            Ok(IndexMap::new())
        }
        other => other,
    }
}

fn load_previous_grouped(
    path: &Utf8Path,
    headers: &[String],
) -> Result<IndexMap<String, Vec<Row>>, ImportError> {
    match tsv::load_grouped(path.as_std_path(), headers, ASSEMBLY_ID) {
        Err(ImportError::HeaderMismatch { path }) => {
            warn!(
                "ignoring previous features {}: headers do not match",
                path.display()
            );
            Ok(IndexMap::new())
        }
        other => other,
    }
}

fn copy_types_files(config: &ResolvedConfig, work_dir: &Utf8Path) -> Result<Vec<String>, ImportError> {
    let yaml_dir = config
        .yaml_path
        .parent()
        .unwrap_or_else(|| Utf8Path::new(""));
    let mut names = Vec::new();
    if let Some(name) = config.yaml_path.file_name() {
        names.push(name.to_string());
    }
    names.extend(config.needs.iter().cloned());

    let mut copied = Vec::new();
    for name in names {
        let source = yaml_dir.join(&name);
        let dest = work_dir.join(&name);
        if !source.as_std_path().is_file() {
            warn!("types file {source} not found");
            continue;
        }
        if source == dest {
            continue;
        }
        fs_util::copy_file_atomic(&source, &dest)?;
        copied.push(dest.to_string());
    }
    Ok(copied)
}
