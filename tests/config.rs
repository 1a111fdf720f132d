use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use genomehubs_assemblies::config::{ConfigLoader, FEATURE_HEADERS, ResolvedConfig};
use genomehubs_assemblies::error::ImportError;

fn write_types(content: &str) -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("ncbi_datasets.types.yaml")).unwrap();
    std::fs::write(path.as_std_path(), content).unwrap();
    (temp, path)
}

#[test]
fn resolve_from_file() {
    let (_temp, path) = write_types(
        r#"
file:
  name: ncbi_datasets_eukaryota.tsv.gz
attributes:
  ebp_standard_criteria:
    header: ebpStandardCriteria
    path: processedAssemblyStats.ebpStandardCriteria
    separator: ";"
names:
  common_name:
    header: commonName
    path: organism.commonName
"#,
    );
    let features = path.with_file_name("ncbi_datasets.features.tsv");
    let resolved = ConfigLoader::resolve(&path, Some(&features)).unwrap();
    assert_eq!(resolved.headers, vec!["ebpStandardCriteria", "commonName"]);
    assert_eq!(resolved.separator("ebpStandardCriteria"), ";");
    assert_eq!(resolved.file_name, "ncbi_datasets_eukaryota.tsv.gz");
    assert_eq!(
        resolved.output_path,
        path.with_file_name("ncbi_datasets_eukaryota.tsv.gz")
    );
    assert_eq!(resolved.feature_path, Some(features));
}

#[test]
fn default_output_name() {
    let (_temp, path) = write_types("attributes:\n  span:\n    header: assemblySpan\n");
    let resolved = ConfigLoader::resolve(&path, None).unwrap();
    assert_eq!(resolved.file_name, "output.tsv");
    assert!(resolved.fields.is_empty());
}

#[test]
fn missing_file_is_a_read_error() {
    let err = ConfigLoader::resolve(
        camino::Utf8Path::new("/nonexistent/ncbi.types.yaml"),
        None,
    )
    .unwrap_err();
    assert_matches!(err, ImportError::ConfigRead(_));
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let (_temp, path) = write_types("attributes: [unclosed\n");
    let err = ConfigLoader::resolve(&path, None).unwrap_err();
    assert_matches!(err, ImportError::ConfigParse(_));
}

#[test]
fn feature_headers_are_fixed() {
    assert_eq!(ResolvedConfig::feature_headers().len(), FEATURE_HEADERS.len());
    assert_eq!(FEATURE_HEADERS[0], "assembly_id");
    assert_eq!(FEATURE_HEADERS[8], "seq_proportion");
}
