//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use sim_lib::resources::is_extended_resource;
use sim_lib::ResourceList;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a rounded table, or a notice when there is nothing to show
pub fn print_table<T: Tabled>(items: &[T]) {
    if items.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a resource list as `cpu=500m memory=1Gi`, extended resources last
pub fn format_resources(resources: &ResourceList) -> String {
    if resources.is_empty() {
        return "-".to_string();
    }
    let (core, extended): (Vec<_>, Vec<_>) = resources
        .iter()
        .partition(|(name, _)| !is_extended_resource(name));
    core.into_iter()
        .chain(extended)
        .map(|(name, quantity)| format!("{name}={quantity}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "admitted" | "consistent" => status.green().to_string(),
        "overcommitted" | "skipped" | "drift" => status.yellow().to_string(),
        "rejected" | "orphaned" => status.red().to_string(),
        _ => status.to_string(),
    }
}
