use genomehubs_assemblies::datasets::parse_sequence_lines;
use genomehubs_assemblies::ncbi::NcbiHttpClient;
use genomehubs_assemblies::sequence::{SequenceClass, SequenceSummary};

#[test]
fn sequence_reports_url() {
    let client = NcbiHttpClient::new().unwrap();
    assert_eq!(
        client.sequence_reports_url("GCA_000001215.4"),
        "https://api.ncbi.nlm.nih.gov/datasets/v2/genome/accession/GCA_000001215.4/sequence_reports"
    );
}

#[test]
fn cli_lines_summarise_like_api_pages() {
    let text = concat!(
        r#"{"genbank_accession":"AE014134.6","chr_name":"2L","role":"assembled-molecule","assigned_molecule_location_type":"Chromosome","assembly_unit":"Primary Assembly","length":23513712}"#,
        "\n",
        r#"{"genbankAccession":"AE014296.5","chrName":"3L","role":"unlocalized-scaffold","assignedMoleculeLocationType":"Chromosome","assemblyUnit":"Primary Assembly","length":"28110227"}"#,
        "\n",
        r#"{"genbank_accession":"KJ947872.2","chr_name":"MT","role":"assembled-molecule","assigned_molecule_location_type":"Mitochondrion","assembly_unit":"non-nuclear","length":19524}"#,
        "\n",
    );
    let records = parse_sequence_lines("GCA_000001215.4", text).unwrap();
    assert_eq!(records[1].classify(), SequenceClass::AssignedScaffold);

    let summary = SequenceSummary::from_records(records);
    assert_eq!(summary.chromosomes.len(), 1);
    assert_eq!(summary.assigned_span, 23_513_712 + 28_110_227);
    assert_eq!(summary.organelles["MT"].len(), 1);
}
