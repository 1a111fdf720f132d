use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::error::ImportError;

/// One output record, header → value, in header insertion order.
pub type Row = IndexMap<String, Value>;

const DEFAULT_SEPARATOR: &str = ",";

pub fn is_gzip(path: &Path) -> bool {
    path.extension().map(|ext| ext == "gz").unwrap_or(false)
}

/// Renders a cell. Nulls are empty, list members are joined with the
/// separator after dropping nulls, and objects are written as JSON.
pub fn format_value(value: &Value, separator: &str) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| format_value(item, separator))
            .collect::<Vec<_>>()
            .join(separator),
        Value::Object(_) => value.to_string(),
    }
}

fn render_row(row: &Row, headers: &[String], separators: &HashMap<String, String>) -> Vec<String> {
    headers
        .iter()
        .map(|header| {
            let separator = separators
                .get(header)
                .map(String::as_str)
                .unwrap_or(DEFAULT_SEPARATOR);
            let cell = row
                .get(header)
                .map(|value| format_value(value, separator))
                .unwrap_or_default();
            if cell.contains(['\t', '\n', '\r']) {
                warn!("replacing tabs and line breaks in {header} value {cell:?}");
                return cell.replace(['\t', '\n', '\r'], " ");
            }
            cell
        })
        .collect()
}

fn fs_err(path: &Path, err: impl std::fmt::Display) -> ImportError {
    ImportError::Filesystem(format!("{}: {err}", path.display()))
}

/// Writes headers and rows, gzip-compressed when the path ends in `.gz`.
/// The file is written next to its destination and renamed into place.
pub fn write_tsv<'a, I>(
    path: &Path,
    headers: &[String],
    rows: I,
    separators: &HashMap<String, String>,
) -> Result<usize, ImportError>
where
    I: IntoIterator<Item = &'a Row>,
{
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| fs_err(parent, err))?;
    let temp = tempfile::Builder::new()
        .prefix(".gh-assemblies")
        .tempfile_in(parent)
        .map_err(|err| fs_err(parent, err))?;

    let file = temp.reopen().map_err(|err| fs_err(temp.path(), err))?;
    let sink: Box<dyn Write> = if is_gzip(path) {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(file)
    };
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .has_headers(false)
        .from_writer(sink);
    writer
        .write_record(headers)
        .map_err(|err| fs_err(path, err))?;
    let mut count = 0usize;
    for row in rows {
        writer
            .write_record(render_row(row, headers, separators))
            .map_err(|err| fs_err(path, err))?;
        count += 1;
    }
    let sink = writer
        .into_inner()
        .map_err(|err| fs_err(path, err.error()))?;
    // Dropping the encoder writes the gzip trailer.
    drop(sink);

    temp.persist(path).map_err(|err| fs_err(path, err))?;
    Ok(count)
}

/// Truncates `path` to a header row.
pub fn init_tsv(path: &Path, headers: &[String]) -> Result<(), ImportError> {
    write_tsv(path, headers, std::iter::empty(), &HashMap::new()).map(|_| ())
}

/// Appends rows to a TSV whose header row already exists.
pub struct TsvAppender {
    writer: csv::Writer<Box<dyn Write>>,
    headers: Vec<String>,
    separators: HashMap<String, String>,
    path: std::path::PathBuf,
    written: usize,
}

impl TsvAppender {
    pub fn open(
        path: &Path,
        headers: Vec<String>,
        separators: HashMap<String, String>,
    ) -> Result<Self, ImportError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| fs_err(path, err))?;
        // A gzip file may hold several members; each appender adds one.
        let sink: Box<dyn Write> = if is_gzip(path) {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };
        let writer = WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(QuoteStyle::Never)
            .has_headers(false)
            .from_writer(sink);
        Ok(Self {
            writer,
            headers,
            separators,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    pub fn append(&mut self, rows: &[Row]) -> Result<(), ImportError> {
        for row in rows {
            let record = render_row(row, &self.headers, &self.separators);
            self.writer
                .write_record(record)
                .map_err(|err| fs_err(&self.path, err))?;
            self.written += 1;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<usize, ImportError> {
        let written = self.written;
        let path = self.path;
        let sink = self
            .writer
            .into_inner()
            .map_err(|err| fs_err(&path, err.error()))?;
        drop(sink);
        Ok(written)
    }
}

pub fn open_reader(path: &Path) -> Result<Box<dyn BufRead>, ImportError> {
    let file = File::open(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => ImportError::MissingInput(path.to_path_buf()),
        _ => fs_err(path, err),
    })?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Reads a TSV into rows of string values. When `expected` is given the
/// header row must equal it exactly.
pub fn read_tsv(
    path: &Path,
    expected: Option<&[String]>,
) -> Result<(Vec<String>, Vec<Row>), ImportError> {
    let reader = open_reader(path)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);
    let headers = reader
        .headers()
        .map_err(|err| ImportError::TsvParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if let Some(expected) = expected {
        if headers.as_slice() != expected {
            return Err(ImportError::HeaderMismatch {
                path: path.to_path_buf(),
            });
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| ImportError::TsvParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let row = headers
            .iter()
            .enumerate()
            .map(|(index, header)| {
                let cell = record.get(index).unwrap_or_default();
                (header.clone(), Value::String(cell.to_string()))
            })
            .collect::<Row>();
        rows.push(row);
    }
    Ok((headers, rows))
}

/// Rows keyed by the `key` column; later rows replace earlier ones. A
/// missing file yields an empty map.
pub fn load_keyed(
    path: &Path,
    headers: &[String],
    key: &str,
) -> Result<IndexMap<String, Row>, ImportError> {
    if !path.exists() {
        return Ok(IndexMap::new());
    }
    let (_, rows) = read_tsv(path, Some(headers))?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let id = row.get(key).and_then(Value::as_str)?.to_string();
            Some((id, row))
        })
        .collect())
}

/// Rows grouped by the `key` column, keeping every row of a group.
pub fn load_grouped(
    path: &Path,
    headers: &[String],
    key: &str,
) -> Result<IndexMap<String, Vec<Row>>, ImportError> {
    let mut grouped: IndexMap<String, Vec<Row>> = IndexMap::new();
    if !path.exists() {
        return Ok(grouped);
    }
    let (_, rows) = read_tsv(path, Some(headers))?;
    for row in rows {
        if let Some(id) = row.get(key).and_then(Value::as_str) {
            grouped.entry(id.to_string()).or_default().push(row);
        }
    }
    Ok(grouped)
}

pub fn read_header(path: &Path) -> Result<Option<Vec<String>>, ImportError> {
    let mut reader = open_reader(path)?;
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|err| fs_err(path, err))?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(
        line.trim_end_matches(['\n', '\r'])
            .split('\t')
            .map(str::to_string)
            .collect(),
    ))
}

/// False when the file is missing, empty or has a different header row.
pub fn headers_match(path: &Path, headers: &[String]) -> bool {
    if !path.exists() {
        return false;
    }
    matches!(read_header(path), Ok(Some(found)) if found.as_slice() == headers)
}

pub fn count_lines(path: &Path) -> Result<usize, ImportError> {
    let reader = open_reader(path)?;
    let mut count = 0usize;
    for line in reader.lines() {
        line.map_err(|err| fs_err(path, err))?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn formats_cells() {
        assert_eq!(format_value(&Value::Null, ","), "");
        assert_eq!(format_value(&json!(12), ","), "12");
        assert_eq!(format_value(&json!(0.5), ","), "0.5");
        assert_eq!(format_value(&json!(["6.7", null, "6.C"]), ";"), "6.7;6.C");
        assert_eq!(format_value(&json!([]), ","), "");
    }

    #[test]
    fn gzip_detection() {
        assert!(is_gzip(Path::new("out/ncbi.tsv.gz")));
        assert!(!is_gzip(Path::new("out/ncbi.tsv")));
    }
}
