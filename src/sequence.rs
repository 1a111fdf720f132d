use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ImportError;
use crate::report::{AssemblyReport, as_u64};

const CHROMOSOME_LOCATIONS: &[&str] = &["Chromosome", "Linkage Group"];
const ASSIGNED_ROLES: &[&str] = &["assembled-molecule", "unlocalized-scaffold"];
const ASSEMBLED_MOLECULE: &str = "assembled-molecule";

/// One row of a `datasets ... --report sequence` report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    #[serde(default, alias = "genbankAccession")]
    pub genbank_accession: Option<String>,
    #[serde(default, alias = "chrName")]
    pub chr_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, alias = "assignedMoleculeLocationType")]
    pub assigned_molecule_location_type: Option<String>,
    #[serde(default, alias = "assemblyUnit")]
    pub assembly_unit: Option<String>,
    #[serde(default, deserialize_with = "lenient_length")]
    pub length: u64,
    #[serde(default, alias = "gcPercent")]
    pub gc_percent: Option<f64>,
}

fn lenient_length<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(as_u64(&value).unwrap_or(0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceClass {
    NonNuclear,
    Chromosome,
    AssignedScaffold,
    Unassigned,
}

impl SequenceRecord {
    pub fn is_non_nuclear(&self) -> bool {
        self.assembly_unit.as_deref() == Some("non-nuclear")
    }

    pub fn is_assigned_to_chromosome(&self) -> bool {
        self.assembly_unit.as_deref() == Some("Primary Assembly")
            && self
                .assigned_molecule_location_type
                .as_deref()
                .map(|location| CHROMOSOME_LOCATIONS.contains(&location))
                .unwrap_or(false)
            && self
                .role
                .as_deref()
                .map(|role| ASSIGNED_ROLES.contains(&role))
                .unwrap_or(false)
    }

    pub fn is_assembled_molecule(&self) -> bool {
        self.role.as_deref() == Some(ASSEMBLED_MOLECULE)
    }

    pub fn classify(&self) -> SequenceClass {
        if self.is_non_nuclear() {
            SequenceClass::NonNuclear
        } else if self.is_assigned_to_chromosome() {
            if self.is_assembled_molecule() {
                SequenceClass::Chromosome
            } else {
                SequenceClass::AssignedScaffold
            }
        } else {
            SequenceClass::Unassigned
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EbpCriterion {
    Ebp67,
    Ebp6C,
    Ebp5C,
    Ebp56,
}

impl EbpCriterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            EbpCriterion::Ebp67 => "6.7",
            EbpCriterion::Ebp6C => "6.C",
            EbpCriterion::Ebp5C => "5.C",
            EbpCriterion::Ebp56 => "5.6",
        }
    }
}

/// Earth BioGenome Project standard tiers met by an assembly.
pub fn ebp_criteria(contig_n50: u64, scaffold_n50: u64, assigned_proportion: f64) -> Vec<EbpCriterion> {
    let mut criteria = Vec::new();
    if contig_n50 >= 1_000_000 && scaffold_n50 >= 10_000_000 {
        criteria.push(EbpCriterion::Ebp67);
    }
    if assigned_proportion >= 0.9 {
        if contig_n50 >= 1_000_000 {
            criteria.push(EbpCriterion::Ebp6C);
        } else if scaffold_n50 < 1_000_000 && contig_n50 >= 100_000 {
            criteria.push(EbpCriterion::Ebp5C);
        } else if scaffold_n50 < 10_000_000 && contig_n50 >= 100_000 {
            criteria.push(EbpCriterion::Ebp56);
        }
    }
    criteria
}

pub fn organelle_name(location_type: &str) -> &'static str {
    if location_type.to_lowercase() == "mitochondrion" {
        "mitochondrion"
    } else {
        "plastid"
    }
}

/// Python-compatible `round(length / 2)`: halves go to the even neighbour.
pub fn midpoint(length: u64) -> u64 {
    let half = length / 2;
    if length % 2 == 0 || half % 2 == 0 {
        half
    } else {
        half + 1
    }
}

/// A sequence report reduced to what the assembly row needs.
#[derive(Debug, Clone, Default)]
pub struct SequenceSummary {
    pub organelles: IndexMap<String, Vec<SequenceRecord>>,
    pub chromosomes: Vec<SequenceRecord>,
    pub assigned_span: u64,
}

impl SequenceSummary {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = SequenceRecord>,
    {
        let mut summary = Self::default();
        for record in records {
            match record.classify() {
                SequenceClass::NonNuclear => {
                    let name = record.chr_name.clone().unwrap_or_default();
                    summary.organelles.entry(name).or_default().push(record);
                }
                SequenceClass::Chromosome => {
                    summary.assigned_span += record.length;
                    summary.chromosomes.push(record);
                }
                SequenceClass::AssignedScaffold => {
                    summary.assigned_span += record.length;
                }
                SequenceClass::Unassigned => {}
            }
        }
        summary
    }

    /// Writes organelle, EBP and chromosome sections into the report.
    pub fn apply(&self, report: &mut AssemblyReport) -> Result<(), ImportError> {
        let accession = report.accession()?.to_string();
        let span = report
            .stat("totalSequenceLength")
            .ok_or_else(|| ImportError::MissingReportField {
                accession: accession.clone(),
                field: "assemblyStats.totalSequenceLength".to_string(),
            })?;
        self.add_organelle_entries(report, &accession);
        self.add_ebp_stats(report, span);
        self.add_chromosome_entries(report, span);
        Ok(())
    }

    fn add_organelle_entries(&self, report: &mut AssemblyReport, accession: &str) {
        if self.organelles.is_empty() {
            return;
        }
        let mut info = match report.get("processedOrganelleInfo") {
            Some(Value::Object(existing)) => existing.clone(),
            _ => Map::new(),
        };
        let mut entries = Vec::new();
        for records in self.organelles.values() {
            let Some(first) = records.first() else {
                continue;
            };
            let location = first
                .assigned_molecule_location_type
                .clone()
                .unwrap_or_default();
            let name = organelle_name(&location);
            let mut entry = Map::new();
            entry.insert("sourceAccession".to_string(), json!(accession));
            entry.insert("organelle".to_string(), json!(location));

            let slot = info
                .entry(name.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(slot) = slot else {
                continue;
            };
            if records.len() == 1 && first.is_assembled_molecule() {
                entry.insert("genbankAssmAccession".to_string(), json!(first.genbank_accession));
                entry.insert("totalSequenceLength".to_string(), json!(first.length));
                entry.insert("gcPercent".to_string(), json!(first.gc_percent));
                slot.insert("assemblySpan".to_string(), json!(first.length));
                slot.insert("gcPercent".to_string(), json!(first.gc_percent));
                slot.insert("accession".to_string(), json!(first.genbank_accession));
            } else {
                let scaffolds = records
                    .iter()
                    .filter_map(|record| record.genbank_accession.as_deref())
                    .collect::<Vec<_>>()
                    .join(";");
                slot.insert("scaffolds".to_string(), json!(scaffolds));
            }
            entries.push(Value::Object(entry));
        }
        report.insert("processedOrganelleInfo", Value::Object(info));
        report.insert("organelles", Value::Array(entries));
    }

    fn add_ebp_stats(&self, report: &mut AssemblyReport, span: u64) {
        if self.chromosomes.is_empty() || span == 0 {
            return;
        }
        let contig_n50 = report.stat("contigN50").unwrap_or(0);
        let scaffold_n50 = report.stat("scaffoldN50").unwrap_or(0);
        let proportion = self.assigned_span as f64 / span as f64;
        let criteria = ebp_criteria(contig_n50, scaffold_n50, proportion);

        let mut stats = Map::new();
        if !criteria.is_empty() {
            stats.insert(
                "ebpStandardDate".to_string(),
                json!(report.release_date()),
            );
            stats.insert(
                "ebpStandardCriteria".to_string(),
                Value::Array(criteria.iter().map(|c| json!(c.as_str())).collect()),
            );
        }
        stats.insert("assignedProportion".to_string(), json!(proportion));
        report.insert("processedAssemblyStats", Value::Object(stats));
    }

    fn add_chromosome_entries(&self, report: &mut AssemblyReport, span: u64) {
        let assembly_id = report.genbank_accession().unwrap_or_default().to_string();
        let features = self
            .chromosomes
            .iter()
            .map(|seq| {
                let seq_proportion = if span == 0 {
                    Value::Null
                } else {
                    json!(seq.length as f64 / span as f64)
                };
                json!({
                    "assembly_id": assembly_id,
                    "sequence_id": seq.genbank_accession,
                    "start": 1,
                    "end": seq.length,
                    "strand": 1,
                    "length": seq.length,
                    "midpoint": midpoint(seq.length),
                    "midpoint_proportion": 0.5,
                    "seq_proportion": seq_proportion,
                })
            })
            .collect();
        report.insert("chromosomes", Value::Array(features));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(unit: &str, location: &str, role: &str, length: u64) -> SequenceRecord {
        SequenceRecord {
            genbank_accession: Some(format!("CM{length}.1")),
            chr_name: Some(location.to_string()),
            role: Some(role.to_string()),
            assigned_molecule_location_type: Some(location.to_string()),
            assembly_unit: Some(unit.to_string()),
            length,
            gc_percent: Some(40.5),
        }
    }

    #[test]
    fn classification() {
        assert_eq!(
            seq("non-nuclear", "Mitochondrion", "assembled-molecule", 16_000).classify(),
            SequenceClass::NonNuclear
        );
        assert_eq!(
            seq("Primary Assembly", "Chromosome", "assembled-molecule", 10).classify(),
            SequenceClass::Chromosome
        );
        assert_eq!(
            seq("Primary Assembly", "Linkage Group", "unlocalized-scaffold", 10).classify(),
            SequenceClass::AssignedScaffold
        );
        assert_eq!(
            seq("Primary Assembly", "Chromosome", "unplaced-scaffold", 10).classify(),
            SequenceClass::Unassigned
        );
    }

    #[test]
    fn midpoint_rounds_half_to_even() {
        assert_eq!(midpoint(10), 5);
        assert_eq!(midpoint(5), 2);
        assert_eq!(midpoint(7), 4);
        assert_eq!(midpoint(1), 0);
    }

    #[test]
    fn tier_six_c_needs_assignment() {
        assert_eq!(
            ebp_criteria(1_000_000, 5_000_000, 0.95),
            vec![EbpCriterion::Ebp6C]
        );
        assert!(ebp_criteria(1_000_000, 5_000_000, 0.5).is_empty());
        assert_eq!(ebp_criteria(200_000, 500_000, 0.9), vec![EbpCriterion::Ebp5C]);
        assert_eq!(ebp_criteria(200_000, 5_000_000, 0.9), vec![EbpCriterion::Ebp56]);
        assert!(ebp_criteria(200_000, 50_000_000, 0.99).is_empty());
    }

    #[test]
    fn organelle_names() {
        assert_eq!(organelle_name("Mitochondrion"), "mitochondrion");
        assert_eq!(organelle_name("MITOCHONDRION"), "mitochondrion");
        assert_eq!(organelle_name("Chloroplast"), "plastid");
    }
}
