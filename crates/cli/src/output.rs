//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use flowprobe::ScenarioStatus;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json | OutputFormat::Yaml => print_value(items, format),
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Print a whole value as JSON or YAML (other formats fall back to JSON).
pub fn print_value<T: Serialize + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Yaml => match serde_yaml::to_string(value) {
            Ok(yaml) => println!("{}", yaml),
            Err(e) => print_error(&format!("YAML encoding failed: {}", e)),
        },
        _ => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => print_error(&format!("JSON encoding failed: {}", e)),
        },
    }
}

pub fn status_label(status: ScenarioStatus) -> String {
    match status {
        ScenarioStatus::Passed => "✓ passed".green().to_string(),
        ScenarioStatus::Failed => "✗ failed".red().to_string(),
        ScenarioStatus::Skipped => "- skipped".dimmed().to_string(),
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}
