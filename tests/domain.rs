use assert_matches::assert_matches;

use genomehubs_assemblies::domain::{AccessionPair, AssemblyLevel, EUKARYOTA_TAXID, TaxonId};
use genomehubs_assemblies::error::ImportError;

#[test]
fn genbank_with_refseq_pair() {
    let pair = AccessionPair::resolve("GCA_000001405.29", Some("GCF_000001405.40")).unwrap();
    assert_eq!(pair.genbank.as_str(), "GCA_000001405.29");
    assert_eq!(pair.refseq.unwrap().as_str(), "GCF_000001405.40");
}

#[test]
fn refseq_with_genbank_pair() {
    let pair = AccessionPair::resolve("GCF_000001405.40", Some("GCA_000001405.29")).unwrap();
    assert_eq!(pair.genbank.as_str(), "GCA_000001405.29");
    assert_eq!(pair.refseq.unwrap().as_str(), "GCF_000001405.40");
}

#[test]
fn unpaired_accession_is_genbank() {
    let pair = AccessionPair::resolve("GCA_000002035.4", None).unwrap();
    assert_eq!(pair.genbank.as_str(), "GCA_000002035.4");
    assert!(pair.refseq.is_none());
}

#[test]
fn invalid_pair_is_rejected() {
    let err = AccessionPair::resolve("GCA_000002035.4", Some("not-an-accession")).unwrap_err();
    assert_matches!(err, ImportError::InvalidGenomeAccession(_));
}

#[test]
fn unknown_level_is_kept() {
    let level: AssemblyLevel = "Pseudo".parse().unwrap();
    assert_eq!(level, AssemblyLevel::Other("Pseudo".to_string()));
    assert!(level.has_sequence_report());
}

#[test]
fn eukaryota_expands_to_subtaxa() {
    let root: TaxonId = EUKARYOTA_TAXID.parse().unwrap();
    let taxa = root.summary_taxa();
    assert!(taxa.len() > 1);
    assert!(!taxa.contains(&root));

    let fly: TaxonId = "7227".parse().unwrap();
    assert_eq!(fly.summary_taxa(), vec![fly.clone()]);
}

#[test]
fn taxon_id_must_be_numeric() {
    let err = "Drosophila".parse::<TaxonId>().unwrap_err();
    assert_matches!(err, ImportError::InvalidTaxonId(_));
}
