use std::collections::HashSet;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ResolvedConfig;
use crate::datasets::SequenceSource;
use crate::error::ImportError;
use crate::report::{AssemblyReport, as_u64};
use crate::retry::RetryPolicy;
use crate::sequence::SequenceSummary;
use crate::tsv::{Row, TsvAppender, format_value};

const LINKED_ASSEMBLY: &str = "linkedAssembly";
const BIOSAMPLE: &str = "biosampleAccession";
const REPRESENTATIVE: &str = "biosampleRepresentative";
const RELEASE_DATE: &str = "releaseDate";
const REFSEQ_CATEGORY: &str = "refseqCategory";

// Row fields copied onto each organelle entry.
const ORGANELLE_ROW_FIELDS: &[&str] = &[
    "taxId",
    "organismName",
    "commonName",
    "releaseDate",
    "submitter",
    "bioProjectAccession",
    "biosampleAccession",
];

/// Where chromosome feature rows go as they are produced.
pub trait FeatureSink {
    fn append(&mut self, rows: &[Row]) -> Result<(), ImportError>;
}

impl FeatureSink for TsvAppender {
    fn append(&mut self, rows: &[Row]) -> Result<(), ImportError> {
        TsvAppender::append(self, rows)
    }
}

impl FeatureSink for Vec<Row> {
    fn append(&mut self, rows: &[Row]) -> Result<(), ImportError> {
        self.extend(rows.iter().cloned());
        Ok(())
    }
}

/// Drops rows of one taxon whose assembly span is below `min_span`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanFilter {
    pub taxon: String,
    pub min_span: u64,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub base_timeout: Duration,
    pub retry: RetryPolicy,
    pub span_filter: Option<SpanFilter>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(120),
            retry: RetryPolicy::fixed(2, Duration::ZERO),
            span_filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The previous run's row was carried forward.
    Reused,
    /// The report was processed; `enriched` is false when no sequence report
    /// was applied.
    Processed { enriched: bool },
    /// Second record of an accession already processed in this run.
    Repeated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub reports: usize,
    pub reused: usize,
    pub processed: usize,
    pub repeated: usize,
    pub enriched: usize,
    pub timeouts: usize,
    pub feature_rows: usize,
    pub filtered: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub rows: IndexMap<String, Row>,
    pub organelles: Vec<Row>,
    pub stats: ReconcileStats,
}

/// Folds a stream of assembly reports into one row per GenBank accession.
pub struct Reconciler<'a, S: SequenceSource> {
    config: &'a ResolvedConfig,
    source: &'a S,
    options: ReconcileOptions,
    previous: IndexMap<String, Row>,
    previous_features: IndexMap<String, Vec<Row>>,
    features: Option<&'a mut dyn FeatureSink>,
    parsed: IndexMap<String, Row>,
    biosamples: IndexMap<String, Vec<String>>,
    fresh: HashSet<String>,
    last_report: Option<AssemblyReport>,
    organelles: Vec<Row>,
    stats: ReconcileStats,
}

impl<'a, S: SequenceSource> Reconciler<'a, S> {
    pub fn new(config: &'a ResolvedConfig, source: &'a S, options: ReconcileOptions) -> Self {
        Self {
            config,
            source,
            options,
            previous: IndexMap::new(),
            previous_features: IndexMap::new(),
            features: None,
            parsed: IndexMap::new(),
            biosamples: IndexMap::new(),
            fresh: HashSet::new(),
            last_report: None,
            organelles: Vec::new(),
            stats: ReconcileStats::default(),
        }
    }

    pub fn with_previous(
        mut self,
        rows: IndexMap<String, Row>,
        features: IndexMap<String, Vec<Row>>,
    ) -> Self {
        self.previous = rows;
        self.previous_features = features;
        self
    }

    pub fn with_features(mut self, sink: &'a mut dyn FeatureSink) -> Self {
        self.features = Some(sink);
        self
    }

    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    pub fn process(&mut self, report: AssemblyReport) -> Result<Outcome, ImportError> {
        self.stats.reports += 1;
        let mut processed = report.process(self.last_report.as_ref())?;
        let accession = processed
            .genbank_accession()
            .map(str::to_string)
            .ok_or_else(|| ImportError::MissingReportField {
                accession: processed.accession().unwrap_or("<unknown>").to_string(),
                field: "processedAssemblyInfo.genbankAccession".to_string(),
            })?;

        if self.reuse_previous(&accession, &processed)? {
            debug!("{accession}: release date unchanged, reusing previous row");
            self.stats.reused += 1;
            return Ok(Outcome::Reused);
        }

        let repeated = self.parsed.contains_key(&accession);
        let mut enriched = false;
        if repeated {
            debug!("{accession}: already processed in this run");
            self.stats.repeated += 1;
        } else {
            if processed.assembly_level().has_sequence_report() {
                enriched = self.enrich(&mut processed)?;
            }
            self.append_features(&processed)?;
            self.stats.processed += 1;
        }

        let mut row = self.extract_row(&processed);
        if repeated {
            // The other half of the pair may not have been the preceding
            // report, so cells it filled in are kept.
            if let Some(existing) = self.parsed.get(&accession) {
                row = layer_row(existing, row);
            }
        } else {
            self.collect_organelles(&processed, &row);
        }
        self.fresh.insert(accession.clone());
        self.add_row(accession, row);
        self.last_report = Some(processed);

        Ok(if repeated {
            Outcome::Repeated
        } else {
            Outcome::Processed { enriched }
        })
    }

    /// Picks biosample representatives, applies the span filter and hands
    /// back the rows in first-seen order.
    pub fn finish(mut self) -> Reconciled {
        self.set_representatives();
        if let Some(filter) = self.options.span_filter.clone() {
            let before = self.parsed.len();
            self.parsed.retain(|_, row| !below_span(row, &filter));
            self.stats.filtered = before - self.parsed.len();
        }
        Reconciled {
            rows: self.parsed,
            organelles: self.organelles,
            stats: self.stats,
        }
    }

    fn reuse_previous(
        &mut self,
        accession: &str,
        processed: &AssemblyReport,
    ) -> Result<bool, ImportError> {
        let Some(previous) = self.previous.get(accession) else {
            return Ok(false);
        };
        let Some(release_date) = processed.release_date() else {
            return Ok(false);
        };
        if previous.get(RELEASE_DATE).and_then(Value::as_str) != Some(release_date) {
            return Ok(false);
        }
        let row = previous.clone();

        if !self.parsed.contains_key(accession) {
            if let (Some(sink), Some(rows)) =
                (self.features.as_mut(), self.previous_features.get(accession))
            {
                sink.append(rows)?;
                self.stats.feature_rows += rows.len();
            }
        }
        self.add_row(accession.to_string(), row);
        Ok(true)
    }

    fn enrich(&mut self, report: &mut AssemblyReport) -> Result<bool, ImportError> {
        let accession = report.accession()?.to_string();
        let base = self.options.base_timeout;
        let source = self.source;
        let fetched = self
            .options
            .retry
            .run(&format!("sequence report for {accession}"), |attempt| {
                source.sequence_report(&accession, base * (attempt + 1))
            });
        match fetched {
            Ok(records) => {
                SequenceSummary::from_records(records).apply(report)?;
                self.stats.enriched += 1;
                Ok(true)
            }
            Err(ImportError::SequenceTimeout { seconds, .. }) => {
                warn!("timed out after {seconds}s fetching sequence report for {accession}; skipping enrichment");
                self.stats.timeouts += 1;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn append_features(&mut self, report: &AssemblyReport) -> Result<(), ImportError> {
        let Some(sink) = self.features.as_mut() else {
            return Ok(());
        };
        let Some(Value::Array(chromosomes)) = report.get("chromosomes") else {
            return Ok(());
        };
        let rows = chromosomes
            .iter()
            .filter_map(|feature| match feature {
                Value::Object(map) => Some(
                    map.iter()
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect::<Row>(),
                ),
                _ => None,
            })
            .collect::<Vec<_>>();
        sink.append(&rows)?;
        self.stats.feature_rows += rows.len();
        Ok(())
    }

    fn extract_row(&self, report: &AssemblyReport) -> Row {
        let mut row = self
            .config
            .fields
            .iter()
            .map(|rule| (rule.header.clone(), report.extract(&rule.path)))
            .collect::<Row>();
        let separator = self.config.separator(LINKED_ASSEMBLY);
        let linked = linked_accessions(row.get(LINKED_ASSEMBLY), separator);
        row.insert(
            LINKED_ASSEMBLY.to_string(),
            Value::Array(linked.into_iter().map(Value::String).collect()),
        );
        row
    }

    fn collect_organelles(&mut self, report: &AssemblyReport, row: &Row) {
        let Some(Value::Array(entries)) = report.get("organelles") else {
            return;
        };
        for entry in entries {
            let Value::Object(entry) = entry else {
                continue;
            };
            let mut organelle = entry
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Row>();
            for key in ORGANELLE_ROW_FIELDS {
                if let Some(value) = row.get(*key) {
                    organelle.insert(key.to_string(), value.clone());
                }
            }
            self.organelles.push(organelle);
        }
    }

    /// Stores `row` and links it both ways with the other members of its
    /// biosample group.
    fn add_row(&mut self, accession: String, mut row: Row) {
        let separator = self.config.separator(LINKED_ASSEMBLY).to_string();
        let biosample = row
            .get(BIOSAMPLE)
            .map(|value| format_value(value, &separator))
            .unwrap_or_default();
        if !biosample.is_empty() {
            let members = self.biosamples.entry(biosample).or_default();
            for member in members.iter() {
                if *member == accession {
                    continue;
                }
                if let Some(linked_row) = self.parsed.get_mut(member) {
                    add_link(linked_row, &accession, &separator);
                }
                add_link(&mut row, member, &separator);
            }
            if !members.contains(&accession) {
                members.push(accession.clone());
            }
        }
        self.parsed.insert(accession, row);
    }

    fn set_representatives(&mut self) {
        for members in self.biosamples.values() {
            if !members.iter().any(|member| self.fresh.contains(member)) {
                continue;
            }
            let mut newest: Option<(&str, String)> = None;
            let mut primary: Option<&str> = None;
            for member in members {
                let Some(row) = self.parsed.get(member) else {
                    continue;
                };
                let date = row
                    .get(RELEASE_DATE)
                    .map(|value| format_value(value, ","))
                    .unwrap_or_default();
                if newest.as_ref().is_none_or(|(_, latest)| date > *latest) {
                    newest = Some((member.as_str(), date));
                }
                let has_category = row
                    .get(REFSEQ_CATEGORY)
                    .map(|value| !format_value(value, ",").is_empty())
                    .unwrap_or(false);
                if has_category {
                    primary = Some(member.as_str());
                }
            }
            let chosen = primary
                .or(newest.map(|(member, _)| member))
                .map(str::to_string);

            for member in members {
                if let Some(row) = self.parsed.get_mut(member) {
                    let flag = if Some(member) == chosen.as_ref() {
                        Value::from(1)
                    } else {
                        Value::Null
                    };
                    row.insert(REPRESENTATIVE.to_string(), flag);
                }
            }
            if let Some(chosen) = chosen {
                debug!("{chosen}: biosample representative");
            }
        }
    }
}

/// Reads a `linkedAssembly` cell as a list; rows from a previous TSV hold
/// it as a separator-joined string.
pub fn linked_accessions(value: Option<&Value>, separator: &str) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| format_value(item, separator))
            .filter(|item| !item.is_empty())
            .collect(),
        Some(Value::String(text)) => text
            .split(separator)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![format_value(other, separator)],
    }
}

/// `existing` updated with every cell of `update` that has content.
fn layer_row(existing: &Row, update: Row) -> Row {
    let mut layered = existing.clone();
    for (header, value) in update {
        if has_content(&value) {
            layered.insert(header, value);
        }
    }
    layered
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => items.iter().any(has_content),
        _ => true,
    }
}

fn add_link(row: &mut Row, accession: &str, separator: &str) {
    let mut linked = linked_accessions(row.get(LINKED_ASSEMBLY), separator);
    if linked.iter().any(|existing| existing == accession) {
        return;
    }
    linked.push(accession.to_string());
    row.insert(
        LINKED_ASSEMBLY.to_string(),
        Value::Array(linked.into_iter().map(Value::String).collect()),
    );
}

fn below_span(row: &Row, filter: &SpanFilter) -> bool {
    let taxon = row
        .get("taxId")
        .map(|value| format_value(value, ","))
        .unwrap_or_default();
    if taxon != filter.taxon {
        return false;
    }
    row.get("assemblySpan")
        .and_then(as_u64)
        .is_some_and(|span| span < filter.min_span)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn linked_cells_from_previous_runs_are_split() {
        assert_eq!(
            linked_accessions(Some(&json!("GCA_1.1;GCA_2.1")), ";"),
            vec!["GCA_1.1", "GCA_2.1"]
        );
        assert_eq!(linked_accessions(Some(&json!("")), ";"), Vec::<String>::new());
        assert_eq!(linked_accessions(None, ";"), Vec::<String>::new());
    }

    #[test]
    fn layering_keeps_cells_the_update_lacks() {
        let existing = row(&[
            ("assemblySpan", json!(1000)),
            ("ebpStandardCriteria", json!(["6.7"])),
            ("refseqAccession", Value::Null),
        ]);
        let update = row(&[
            ("assemblySpan", json!(1001)),
            ("ebpStandardCriteria", json!([])),
            ("refseqAccession", json!("GCF_1.1")),
        ]);
        let layered = layer_row(&existing, update);
        assert_eq!(layered["assemblySpan"], json!(1001));
        assert_eq!(layered["ebpStandardCriteria"], json!(["6.7"]));
        assert_eq!(layered["refseqAccession"], json!("GCF_1.1"));
    }

    #[test]
    fn links_are_not_duplicated() {
        let mut linked = row(&[(LINKED_ASSEMBLY, json!("GCA_1.1"))]);
        add_link(&mut linked, "GCA_1.1", ";");
        assert_eq!(linked[LINKED_ASSEMBLY], json!("GCA_1.1"));
        add_link(&mut linked, "GCA_2.1", ";");
        assert_eq!(linked[LINKED_ASSEMBLY], json!(["GCA_1.1", "GCA_2.1"]));
    }

    #[test]
    fn span_filter_only_drops_the_named_taxon() {
        let filter = SpanFilter {
            taxon: "9606".to_string(),
            min_span: 1_000_000_000,
        };
        assert!(below_span(
            &row(&[("taxId", json!("9606")), ("assemblySpan", json!(5_000_000))]),
            &filter
        ));
        assert!(!below_span(
            &row(&[("taxId", json!(9606)), ("assemblySpan", json!("3100000000"))]),
            &filter
        ));
        assert!(!below_span(
            &row(&[("taxId", json!("10090")), ("assemblySpan", json!(5))]),
            &filter
        ));
        assert!(!below_span(&row(&[("taxId", json!("9606"))]), &filter));
    }
}
