//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use chrono::{DateTime, Utc};

use crate::error::{ClusterOperationError, Error};
use crate::orchestrator::Operation;
use crate::pce::ContainerCluster;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No clusters found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

fn format_time(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

// ============================================================================
// Cluster display
// ============================================================================

pub fn format_cluster_list(clusters: &[ContainerCluster]) -> String {
    let headers = &["NAME", "STATUS", "ENFORCEMENT", "LABELS", "CREATED"];
    let rows: Vec<Vec<String>> = clusters
        .iter()
        .map(|c| {
            vec![
                c.name.clone(),
                c.status().to_string(),
                c.enforcement_mode.to_string(),
                c.labels.len().to_string(),
                format_time(c.created_at.as_ref()),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format a single cluster for detailed display
pub fn format_cluster_detail(cluster: &ContainerCluster) -> String {
    let mut output = String::new();

    output.push_str(&format!("Name:         {}\n", cluster.name));
    if !cluster.href.is_empty() {
        output.push_str(&format!("Href:         {}\n", cluster.href));
    }
    output.push_str(&format!("Status:       {}\n", cluster.status()));
    output.push_str(&format!("Enforcement:  {}\n", cluster.enforcement_mode));
    if let Some(description) = &cluster.description {
        output.push_str(&format!("Description:  {}\n", description));
    }
    output.push_str(&format!("Created:      {}\n", format_time(cluster.created_at.as_ref())));
    output.push_str(&format!("Updated:      {}\n", format_time(cluster.updated_at.as_ref())));
    if cluster.token.is_some() {
        output.push_str("Token:        ***\n");
    }

    if !cluster.labels.is_empty() {
        output.push_str("Labels:\n");
        for label in &cluster.labels {
            output.push_str(&format!("  {}\n", label.href));
        }
    }

    output
}

pub fn format_create_result(cluster: &ContainerCluster, dry_run: bool) -> String {
    if dry_run {
        return format!(
            "Dry run: cluster {} would be created, no changes made\n",
            cluster.name
        );
    }
    format!(
        "Cluster {} is {} ({})\n",
        cluster.name,
        cluster.status(),
        cluster.href
    )
}

pub fn format_delete_result(name: &str) -> String {
    format!("Cluster {} and its resources are deleted\n", name)
}

// ============================================================================
// Error display
// ============================================================================

/// Failed step, compensation outcome and what is left for an operator
pub fn format_operation_error(err: &ClusterOperationError) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Error: failed to {} cluster {}\n",
        err.operation, err.cluster
    ));
    output.push_str(&format!("Failed step:  {}\n", err.step));
    output.push_str(&format!("Cause:        {}\n", err.cause));

    if let Some(report) = &err.rollback {
        if report.is_complete() {
            output.push_str(&format!(
                "Rollback:     complete ({} resources removed)\n",
                report.undone.len()
            ));
        } else {
            output.push_str("Rollback:     incomplete\n");
            for failure in &report.failed {
                output.push_str(&format!("  {}: {}\n", failure.resource, failure.error));
            }
        }
    } else if err.operation == Operation::Create {
        output.push_str("Rollback:     not needed\n");
    }

    let cleanup = err.manual_cleanup();
    if !cleanup.is_empty() {
        output.push_str("Manual cleanup required:\n");
        for resource in cleanup {
            output.push_str(&format!("  - {}\n", resource));
        }
    }

    output
}

pub fn format_error(err: &Error) -> String {
    match err.as_cluster_operation() {
        Some(op) => format_operation_error(op),
        None => format!("Error: {}\n", err),
    }
}
