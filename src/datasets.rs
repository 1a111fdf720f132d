use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::TaxonId;
use crate::error::ImportError;
use crate::sequence::SequenceRecord;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-assembly sequence reports.
pub trait SequenceSource: Send + Sync {
    fn sequence_report(
        &self,
        accession: &str,
        timeout: Duration,
    ) -> Result<Vec<SequenceRecord>, ImportError>;
}

/// Assembly summaries for a taxon, as JSON lines.
pub trait SummarySource: Send + Sync {
    fn genome_summary(&self, taxon: &TaxonId) -> Result<String, ImportError>;
}

#[derive(Debug)]
enum RunFailure {
    TimedOut,
    Failed(String),
}

/// Wraps the NCBI `datasets` command line tool.
#[derive(Debug, Clone)]
pub struct DatasetsCli {
    datasets: Option<PathBuf>,
}

impl DatasetsCli {
    pub fn new() -> Self {
        Self {
            datasets: find_in_path("datasets"),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            datasets: Some(program.into()),
        }
    }

    fn require_datasets(&self) -> Result<&PathBuf, ImportError> {
        self.datasets
            .as_ref()
            .ok_or_else(|| ImportError::MissingTool("datasets".to_string()))
    }

    fn run_cmd(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<String, RunFailure> {
        debug!("running {} {}", program.display(), args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| RunFailure::Failed(err.to_string()))?;

        let readers = PipeReaders::spawn(&mut child);

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                        let _ = child.kill();
                        let _ = child.wait();
                        readers.join();
                        return Err(RunFailure::TimedOut);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    readers.join();
                    return Err(RunFailure::Failed(err.to_string()));
                }
            }
        };

        let (stdout, stderr) = readers.join();
        if status.success() {
            return Ok(stdout);
        }
        let stderr = stderr.trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {} ({status})", program.display())
        } else {
            stderr
        };
        Err(RunFailure::Failed(message))
    }
}

impl Default for DatasetsCli {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceSource for DatasetsCli {
    fn sequence_report(
        &self,
        accession: &str,
        timeout: Duration,
    ) -> Result<Vec<SequenceRecord>, ImportError> {
        let datasets = self.require_datasets()?;
        let args = vec![
            "summary".to_string(),
            "genome".to_string(),
            "accession".to_string(),
            accession.to_string(),
            "--report".to_string(),
            "sequence".to_string(),
            "--as-json-lines".to_string(),
        ];
        let stdout = self
            .run_cmd(datasets, &args, Some(timeout))
            .map_err(|failure| match failure {
                RunFailure::TimedOut => ImportError::SequenceTimeout {
                    accession: accession.to_string(),
                    seconds: timeout.as_secs(),
                },
                RunFailure::Failed(message) => ImportError::SequenceFetch(message),
            })?;
        parse_sequence_lines(accession, &stdout)
    }
}

impl SummarySource for DatasetsCli {
    fn genome_summary(&self, taxon: &TaxonId) -> Result<String, ImportError> {
        let datasets = self.require_datasets()?;
        let args = vec![
            "summary".to_string(),
            "genome".to_string(),
            "taxon".to_string(),
            taxon.as_str().to_string(),
            "--as-json-lines".to_string(),
        ];
        self.run_cmd(datasets, &args, None)
            .map_err(|failure| match failure {
                RunFailure::TimedOut => {
                    ImportError::SummaryFetch(format!("timed out fetching taxon {taxon}"))
                }
                RunFailure::Failed(message) => ImportError::SummaryFetch(message),
            })
    }
}

pub fn parse_sequence_lines(
    accession: &str,
    text: &str,
) -> Result<Vec<SequenceRecord>, ImportError> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<SequenceRecord>(line).map_err(|err| {
                ImportError::SequenceParse {
                    accession: accession.to_string(),
                    message: err.to_string(),
                }
            })
        })
        .collect()
}

/// Threads draining a child's stdout and stderr so it never blocks on a
/// full pipe.
struct PipeReaders {
    stdout: JoinHandle<String>,
    stderr: JoinHandle<String>,
}

impl PipeReaders {
    fn spawn(child: &mut Child) -> Self {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        Self {
            stdout: thread::spawn(move || drain(stdout)),
            stderr: thread::spawn(move || drain(stderr)),
        }
    }

    fn join(self) -> (String, String) {
        (
            self.stdout.join().unwrap_or_default(),
            self.stderr.join().unwrap_or_default(),
        )
    }
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_snake_and_camel_case_lines() {
        let text = concat!(
            r#"{"genbank_accession":"CM000001.1","chr_name":"1","role":"assembled-molecule","assigned_molecule_location_type":"Chromosome","assembly_unit":"Primary Assembly","length":1000,"gc_percent":41.0}"#,
            "\n\n",
            r#"{"genbankAccession":"CM000002.1","chrName":"MT","role":"assembled-molecule","assignedMoleculeLocationType":"Mitochondrion","assemblyUnit":"non-nuclear","length":"16569"}"#,
            "\n"
        );
        let records = parse_sequence_lines("GCA_000001405.29", text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].length, 1000);
        assert_eq!(records[1].chr_name.as_deref(), Some("MT"));
        assert_eq!(records[1].length, 16_569);
        assert!(records[1].is_non_nuclear());
    }

    #[test]
    fn malformed_line_is_a_parse_error() {
        let err = parse_sequence_lines("GCA_000001405.29", "{not json").unwrap_err();
        assert_matches!(err, ImportError::SequenceParse { .. });
    }

    #[test]
    fn missing_tool_is_reported() {
        let cli = DatasetsCli { datasets: None };
        let err = cli
            .sequence_report("GCA_000001405.29", Duration::from_secs(1))
            .unwrap_err();
        assert_matches!(err, ImportError::MissingTool(_));
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let cli = DatasetsCli::with_program("sleep");
        let failure = cli
            .run_cmd(
                Path::new("sleep"),
                &["5".to_string()],
                Some(Duration::from_millis(200)),
            )
            .unwrap_err();
        assert_matches!(failure, RunFailure::TimedOut);
    }

    #[cfg(unix)]
    #[test]
    fn timed_out_command_does_not_wait_for_completion() {
        let cli = DatasetsCli::with_program("sh");
        let started = Instant::now();
        let failure = cli
            .run_cmd(
                Path::new("sh"),
                &["-c".to_string(), "echo partial; exec sleep 5".to_string()],
                Some(Duration::from_millis(200)),
            )
            .unwrap_err();
        assert_matches!(failure, RunFailure::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_stderr() {
        let cli = DatasetsCli::with_program("sh");
        let failure = cli
            .run_cmd(
                Path::new("sh"),
                &["-c".to_string(), "echo 'no such taxon' >&2; exit 1".to_string()],
                None,
            )
            .unwrap_err();
        assert_matches!(failure, RunFailure::Failed(message) if message == "no such taxon");
    }
}
