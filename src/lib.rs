pub mod app;
pub mod config;
pub mod datasets;
pub mod domain;
pub mod error;
pub mod fields;
pub mod fs_util;
pub mod ncbi;
pub mod output;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod sequence;
pub mod tsv;
