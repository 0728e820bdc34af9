pub mod fill;
pub mod get;
pub mod ping;
pub mod release;

use serde::Serialize;

use crate::OutputFormat;

/// Render cached bytes for a terminal.
pub fn display(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

/// Print `report` as pretty JSON, or hand it to `text` otherwise.
pub fn emit<T: Serialize>(
    format: &OutputFormat,
    report: &T,
    text: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => text(report),
    }
    Ok(())
}
