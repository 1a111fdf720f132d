use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ImportError;

/// NCBI taxon id of Eukaryota.
pub const EUKARYOTA_TAXID: &str = "2759";

// A single `datasets summary genome taxon 2759` call is too large for the
// service, so the eukaryote root is fetched as these sub-taxa.
const EUKARYOTA_SUBTAXA: &[&str] = &[
    "2763", "33090", "38254", "3027", "2795258", "3004206", "2683617", "2686027", "2698737",
    "2611341", "1401294", "61964", "554915", "2611352", "2608240", "2489521", "2598132",
    "2608109", "33154", "554296", "42452",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SequenceSourceKind {
    /// The `datasets` command line tool.
    Cli,
    /// The NCBI Datasets v2 REST API.
    Api,
}

impl fmt::Display for SequenceSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceSourceKind::Cli => write!(f, "cli"),
            SequenceSourceKind::Api => write!(f, "api"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenomeAccession(String);

impl GenomeAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_refseq(&self) -> bool {
        self.0.starts_with("GCF_")
    }
}

impl fmt::Display for GenomeAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GenomeAccession {
    type Err = ImportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = normalized.starts_with("GCF_") || normalized.starts_with("GCA_");
        let parts = normalized.split('.').collect::<Vec<_>>();
        let has_numeric = parts
            .first()
            .map(|prefix| prefix.trim_start_matches("GCF_").trim_start_matches("GCA_"))
            .map(|rest| rest.chars().all(|ch| ch.is_ascii_digit()) && !rest.is_empty())
            .unwrap_or(false);
        if !is_valid || !has_numeric {
            return Err(ImportError::InvalidGenomeAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// GenBank and RefSeq accessions of one assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessionPair {
    pub genbank: GenomeAccession,
    pub refseq: Option<GenomeAccession>,
}

impl AccessionPair {
    /// Assigns roles from a report's `accession` and `pairedAccession`. Only the
    /// paired accession's prefix is inspected: a `GCF_` pair is the RefSeq side,
    /// anything else makes the report's own accession the RefSeq one.
    pub fn resolve(accession: &str, paired: Option<&str>) -> Result<Self, ImportError> {
        let accession: GenomeAccession = accession.parse()?;
        match paired {
            Some(paired) => {
                let paired: GenomeAccession = paired.parse()?;
                if paired.is_refseq() {
                    Ok(Self {
                        genbank: accession,
                        refseq: Some(paired),
                    })
                } else {
                    Ok(Self {
                        genbank: paired,
                        refseq: Some(accession),
                    })
                }
            }
            None => Ok(Self {
                genbank: accession,
                refseq: None,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyLevel {
    Contig,
    Scaffold,
    Chromosome,
    CompleteGenome,
    Other(String),
}

impl AssemblyLevel {
    /// Contig and scaffold assemblies have nothing assigned to chromosomes.
    pub fn has_sequence_report(&self) -> bool {
        !matches!(self, AssemblyLevel::Contig | AssemblyLevel::Scaffold)
    }
}

impl FromStr for AssemblyLevel {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "Contig" => AssemblyLevel::Contig,
            "Scaffold" => AssemblyLevel::Scaffold,
            "Chromosome" => AssemblyLevel::Chromosome,
            "Complete Genome" => AssemblyLevel::CompleteGenome,
            other => AssemblyLevel::Other(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonId(String);

impl TaxonId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Taxa to query for this root, in query order.
    pub fn summary_taxa(&self) -> Vec<TaxonId> {
        if self.0 == EUKARYOTA_TAXID {
            EUKARYOTA_SUBTAXA
                .iter()
                .map(|taxid| TaxonId(taxid.to_string()))
                .collect()
        } else {
            vec![self.clone()]
        }
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonId {
    type Err = ImportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(ImportError::InvalidTaxonId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_genome_accession_valid() {
        let acc: GenomeAccession = "GCF_000005845.2".parse().unwrap();
        assert_eq!(acc.as_str(), "GCF_000005845.2");
        assert!(acc.is_refseq());
    }

    #[test]
    fn parse_genome_accession_invalid() {
        let err = "ABC_123".parse::<GenomeAccession>().unwrap_err();
        assert_matches!(err, ImportError::InvalidGenomeAccession(_));
    }

    #[test]
    fn level_gates_sequence_report() {
        assert!(!"Contig".parse::<AssemblyLevel>().unwrap().has_sequence_report());
        assert!(!"Scaffold".parse::<AssemblyLevel>().unwrap().has_sequence_report());
        assert!("Chromosome".parse::<AssemblyLevel>().unwrap().has_sequence_report());
        assert!(
            "Complete Genome"
                .parse::<AssemblyLevel>()
                .unwrap()
                .has_sequence_report()
        );
    }
}
