use std::io::{self, Write};

use serde::Serialize;

use crate::app::{FetchPreviousResult, FetchSummaryResult, ParseResult, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_parse(result: &ParseResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch_summary(result: &FetchSummaryResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch_previous(result: &FetchPreviousResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards progress events to the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!("{} ({}ms)", event.message, elapsed.as_millis()),
            None => tracing::info!("{}", event.message),
        }
    }
}
