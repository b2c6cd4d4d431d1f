//! Output helpers shared by the command handlers.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use serde::Serialize;

use opschain_types::ParamMap;
use opschain_types::params::parse_assignment;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print `items` as JSON, or through `render` as text (`empty` when there are none).
pub fn handle_list<T: Serialize>(format: OutputFormat, items: &[T], empty: &str, render: impl FnOnce(&[T])) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(items),
        OutputFormat::Text if items.is_empty() => {
            println!("{empty}");
            Ok(())
        }
        OutputFormat::Text => {
            render(items);
            Ok(())
        }
    }
}

/// Collect repeated `--param KEY=VALUE` arguments; later keys win.
pub fn parse_params(assignments: &[String]) -> Result<ParamMap> {
    let mut params = ParamMap::new();
    for assignment in assignments {
        let (key, value) =
            parse_assignment(assignment).with_context(|| format!("invalid parameter '{assignment}', expected KEY=VALUE"))?;
        params.insert(key, value);
    }
    Ok(params)
}

pub fn format_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn format_optional_time(time: Option<DateTime<Utc>>) -> String {
    time.map(format_time).unwrap_or_else(|| "-".into())
}
