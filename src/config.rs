use std::collections::HashMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::fields::FieldPath;

/// Header row of the chromosome feature TSV.
pub const FEATURE_HEADERS: &[&str] = &[
    "assembly_id",
    "sequence_id",
    "start",
    "end",
    "strand",
    "length",
    "midpoint",
    "midpoint_proportion",
    "seq_proportion",
];

/// Header row of the organelle TSV.
pub const ORGANELLE_HEADERS: &[&str] = &[
    "sourceAccession",
    "organelle",
    "genbankAssmAccession",
    "totalSequenceLength",
    "gcPercent",
    "taxId",
    "organismName",
    "commonName",
    "releaseDate",
    "submitter",
    "bioProjectAccession",
    "biosampleAccession",
];

const DEFAULT_FILE_NAME: &str = "output.tsv";
const DEFAULT_SEPARATOR: &str = ",";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TypesConfig {
    #[serde(default)]
    pub file: FileSpec,
    #[serde(default)]
    pub attributes: IndexMap<String, FieldSpec>,
    #[serde(default)]
    pub identifiers: IndexMap<String, FieldSpec>,
    #[serde(default)]
    pub metadata: IndexMap<String, FieldSpec>,
    #[serde(default)]
    pub names: IndexMap<String, FieldSpec>,
    #[serde(default)]
    pub taxonomy: IndexMap<String, FieldSpec>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FileSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub needs: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FieldSpec {
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub separator: Option<Separator>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Separator {
    Single(String),
    Many(Vec<String>),
}

impl Separator {
    fn first(&self) -> Option<&str> {
        match self {
            Separator::Single(value) => Some(value.as_str()),
            Separator::Many(values) => values.first().map(String::as_str),
        }
    }
}

impl TypesConfig {
    fn sections(&self) -> [&IndexMap<String, FieldSpec>; 5] {
        [
            &self.attributes,
            &self.identifiers,
            &self.metadata,
            &self.names,
            &self.taxonomy,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub header: String,
    pub path: FieldPath,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub yaml_path: Utf8PathBuf,
    pub file_name: String,
    pub output_path: Utf8PathBuf,
    pub headers: Vec<String>,
    pub fields: Vec<FieldRule>,
    pub separators: HashMap<String, String>,
    pub needs: Vec<String>,
    pub feature_path: Option<Utf8PathBuf>,
}

impl ResolvedConfig {
    pub fn separator(&self, header: &str) -> &str {
        self.separators
            .get(header)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SEPARATOR)
    }

    pub fn feature_headers() -> Vec<String> {
        FEATURE_HEADERS.iter().map(|value| value.to_string()).collect()
    }

    pub fn organelle_headers() -> Vec<String> {
        ORGANELLE_HEADERS.iter().map(|value| value.to_string()).collect()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        yaml_path: &Utf8Path,
        feature_path: Option<&Utf8Path>,
    ) -> Result<ResolvedConfig, ImportError> {
        let content = fs::read_to_string(yaml_path.as_std_path())
            .map_err(|_| ImportError::ConfigRead(yaml_path.as_std_path().to_path_buf()))?;
        let config: TypesConfig = serde_yaml::from_str(&content)
            .map_err(|err| ImportError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config, yaml_path, feature_path)
    }

    pub fn resolve_config(
        config: TypesConfig,
        yaml_path: &Utf8Path,
        feature_path: Option<&Utf8Path>,
    ) -> Result<ResolvedConfig, ImportError> {
        let mut headers: Vec<String> = Vec::new();
        let mut fields = Vec::new();
        let mut separators = HashMap::new();

        for section in config.sections() {
            for spec in section.values() {
                let Some(header) = &spec.header else {
                    continue;
                };
                if !headers.contains(header) {
                    headers.push(header.clone());
                }
                if let Some(separator) = spec.separator.as_ref().and_then(Separator::first) {
                    separators.insert(header.clone(), separator.to_string());
                }
                if let Some(path) = &spec.path {
                    if !fields.iter().any(|rule: &FieldRule| &rule.header == header) {
                        fields.push(FieldRule {
                            header: header.clone(),
                            path: FieldPath::parse(path),
                        });
                    }
                }
            }
        }

        if headers.is_empty() {
            return Err(ImportError::MissingConfigField("header".to_string()));
        }

        let file_name = config
            .file
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
        let yaml_dir = yaml_path.parent().unwrap_or_else(|| Utf8Path::new(""));
        let output_path = yaml_dir.join(&file_name);

        Ok(ResolvedConfig {
            yaml_path: yaml_path.to_path_buf(),
            file_name,
            output_path,
            headers,
            fields,
            separators,
            needs: config.file.needs,
            feature_path: feature_path.map(Utf8Path::to_path_buf),
        })
    }
}
