use std::io::BufRead;

use serde_json::{Map, Value, json};

use crate::domain::{AccessionPair, AssemblyLevel};
use crate::error::ImportError;
use crate::fields::{FieldPath, camel_case_keys};

/// One NCBI Datasets assembly report with camelCase keys, plus the
/// `processed*` sections added while reconciling.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyReport {
    data: Map<String, Value>,
}

impl AssemblyReport {
    pub fn from_value(value: Value) -> Result<Self, String> {
        match camel_case_keys(value) {
            Value::Object(data) => Ok(Self { data }),
            other => Err(format!("expected a JSON object, found {other}")),
        }
    }

    pub fn parse_line(line: &str, line_number: usize) -> Result<Self, ImportError> {
        let value: Value = serde_json::from_str(line).map_err(|err| ImportError::ReportParse {
            line: line_number,
            message: err.to_string(),
        })?;
        Self::from_value(value).map_err(|message| ImportError::ReportParse {
            line: line_number,
            message,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.data.get(*first)?;
        for key in rest {
            current = current.get(*key)?;
        }
        Some(current)
    }

    pub fn extract(&self, path: &FieldPath) -> Value {
        path.extract_map(&self.data)
    }

    pub fn accession(&self) -> Result<&str, ImportError> {
        self.data
            .get("accession")
            .and_then(Value::as_str)
            .ok_or_else(|| ImportError::MissingReportField {
                accession: "<unknown>".to_string(),
                field: "accession".to_string(),
            })
    }

    pub fn paired_accession(&self) -> Option<&str> {
        self.data.get("pairedAccession").and_then(Value::as_str)
    }

    pub fn genbank_accession(&self) -> Option<&str> {
        self.lookup(&["processedAssemblyInfo", "genbankAccession"])
            .and_then(Value::as_str)
    }

    pub fn release_date(&self) -> Option<&str> {
        self.lookup(&["assemblyInfo", "releaseDate"])
            .and_then(Value::as_str)
    }

    pub fn assembly_level(&self) -> AssemblyLevel {
        let level = self
            .lookup(&["assemblyInfo", "assemblyLevel"])
            .and_then(Value::as_str)
            .unwrap_or_default();
        level.parse().unwrap_or(AssemblyLevel::Other(level.to_string()))
    }

    pub fn stat(&self, key: &str) -> Option<u64> {
        self.lookup(&["assemblyStats", key]).and_then(as_u64)
    }

    pub fn has_refseq_category(&self) -> bool {
        self.lookup(&["assemblyInfo", "refseqCategory"]).is_some()
    }

    /// Adds `processedAssemblyInfo` with the GenBank/RefSeq roles. When the
    /// preceding report in the stream describes the same GenBank assembly,
    /// this report is layered on top of it so enrichment from the other half
    /// of the pair is carried over.
    pub fn process(self, previous: Option<&AssemblyReport>) -> Result<Self, ImportError> {
        let pair = AccessionPair::resolve(self.accession()?, self.paired_accession())?;
        let mut info = Map::new();
        info.insert("organelle".to_string(), json!("nucleus"));
        if let Some(refseq) = &pair.refseq {
            info.insert("refseqAccession".to_string(), json!(refseq.as_str()));
        }
        info.insert("genbankAccession".to_string(), json!(pair.genbank.as_str()));

        let mut processed = self;
        processed.insert("processedAssemblyInfo", Value::Object(info));

        if let Some(previous) = previous {
            if previous.genbank_accession() == Some(pair.genbank.as_str()) {
                let mut merged = previous.data.clone();
                merged.extend(processed.data);
                processed = Self { data: merged };
            }
        }

        if processed.has_refseq_category() || pair.refseq.is_some() {
            if let Some(Value::Object(info)) = processed.data.get_mut("processedAssemblyInfo") {
                info.insert("primaryValue".to_string(), json!(1));
            }
        }
        Ok(processed)
    }
}

/// Reads JSON-lines assembly reports, skipping blank lines.
pub struct ReportReader<R> {
    reader: R,
    line_number: usize,
}

impl<R: BufRead> ReportReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
        }
    }
}

impl<R: BufRead> Iterator for ReportReader<R> {
    type Item = Result<AssemblyReport, ImportError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            self.line_number += 1;
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) if line.trim().is_empty() => continue,
                Ok(_) => return Some(AssemblyReport::parse_line(line.trim_end(), self.line_number)),
                Err(err) => {
                    return Some(Err(ImportError::ReportParse {
                        line: self.line_number,
                        message: err.to_string(),
                    }));
                }
            }
        }
    }
}

/// Integer statistics arrive as numbers or numeric strings.
pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(value: Value) -> AssemblyReport {
        AssemblyReport::from_value(value).unwrap()
    }

    #[test]
    fn refseq_pair_sets_roles_and_primary_value() {
        let processed = report(json!({
            "accession": "GCA_000001405.29",
            "pairedAccession": "GCF_000001405.40",
            "assemblyInfo": {"releaseDate": "2022-02-03"}
        }))
        .process(None)
        .unwrap();
        let info = processed.get("processedAssemblyInfo").unwrap();
        assert_eq!(info["genbankAccession"], "GCA_000001405.29");
        assert_eq!(info["refseqAccession"], "GCF_000001405.40");
        assert_eq!(info["primaryValue"], 1);
        assert_eq!(info["organelle"], "nucleus");
    }

    #[test]
    fn refseq_record_points_back_to_genbank() {
        let processed = report(json!({
            "accession": "GCF_000001405.40",
            "pairedAccession": "GCA_000001405.29"
        }))
        .process(None)
        .unwrap();
        assert_eq!(processed.genbank_accession(), Some("GCA_000001405.29"));
    }

    #[test]
    fn unpaired_without_category_has_no_primary_value() {
        let processed = report(json!({"accession": "GCA_000002035.4", "assemblyInfo": {}}))
            .process(None)
            .unwrap();
        assert!(
            processed
                .lookup(&["processedAssemblyInfo", "primaryValue"])
                .is_none()
        );
    }

    #[test]
    fn same_assembly_inherits_previous_enrichment() {
        let first = report(json!({
            "accession": "GCA_000001405.29",
            "processedAssemblyStats": {"assignedProportion": 0.95}
        }))
        .process(None)
        .unwrap();
        let second = report(json!({
            "accession": "GCF_000001405.40",
            "pairedAccession": "GCA_000001405.29"
        }))
        .process(Some(&first))
        .unwrap();
        assert_eq!(
            second.lookup(&["processedAssemblyStats", "assignedProportion"]),
            Some(&json!(0.95))
        );
        assert_eq!(second.accession().unwrap(), "GCF_000001405.40");
    }

    #[test]
    fn stats_accept_numeric_strings() {
        let parsed = report(json!({"assembly_stats": {"contig_n50": "51000", "scaffold_n50": 2_000_000}}));
        assert_eq!(parsed.stat("contigN50"), Some(51_000));
        assert_eq!(parsed.stat("scaffoldN50"), Some(2_000_000));
    }
}
