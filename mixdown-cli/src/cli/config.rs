//! `mixdown config`: print the default configuration.

use mixdown_lib::RenderConfig;

use crate::error::CliError;

pub fn run() -> Result<i32, CliError> {
    println!("{}", serde_json::to_string_pretty(&RenderConfig::default())?);
    Ok(0)
}
