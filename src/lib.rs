pub mod batch;
pub mod cli;
pub mod data;
pub mod directive;
pub mod error;
pub mod io_utils;
pub mod listing;
pub mod lookup;
pub mod remap;
pub mod rules;
pub mod template;
pub mod validate;

use std::{env, sync::OnceLock};

use anyhow::{Result, anyhow};
use clap::Parser;
use log::LevelFilter;

use crate::cli::Cli;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_remap", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let Some(args) = cli.into_remap_args().map_err(|err| anyhow!(err))? else {
        println!("{}", crate::cli::USAGE);
        return Ok(());
    };
    remap::execute(&args)
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
