//! Rendering of aggregated status reports.
//!
//! Console output for interactive use, a standalone HTML document for mail
//! and JSON for other tools.

pub mod format;
pub mod mail;

use crate::status::{Status, StatusRecord, StatusReport};
use crate::utils::Result;
use format::{format_bytes, format_duration};
use owo_colors::OwoColorize;

/// Subject prefix of report mails.
pub const SUBJECT_PREFIX: &str = "Backup status";

/// `Backup status: ERR, UNK, OK` with the labels seen, most severe first.
pub fn subject(report: &StatusReport) -> String {
    let labels: Vec<&str> = report
        .labels_by_severity()
        .into_iter()
        .map(Status::label)
        .collect();
    if labels.is_empty() {
        format!("{}: no targets", SUBJECT_PREFIX)
    } else {
        format!("{}: {}", SUBJECT_PREFIX, labels.join(", "))
    }
}

struct Cells {
    last_success: String,
    duration: String,
    size: String,
    comment: String,
}

impl Cells {
    fn of(record: &StatusRecord) -> Self {
        Self {
            last_success: record
                .last_success
                .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
            duration: record
                .duration
                .as_deref()
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            size: record
                .size
                .map(format_bytes)
                .unwrap_or_else(|| "-".to_string()),
            comment: record.comment.clone().unwrap_or_default(),
        }
    }
}

fn colored_label(status: Status, color: bool) -> String {
    let label = format!("{:<3}", status.label());
    if !color {
        return label;
    }
    match status {
        Status::Ok => label.green().to_string(),
        Status::Unknown => label.yellow().to_string(),
        Status::Error => label.red().bold().to_string(),
    }
}

/// Plain-text report, one block per section.
pub fn render_console(report: &StatusReport, color: bool) -> String {
    let mut output = String::new();

    if report.is_empty() {
        output.push_str("No backup targets found\n");
        return output;
    }

    let width = report
        .records()
        .map(|r| r.target.chars().count())
        .max()
        .unwrap_or(0);

    for (section, records) in &report.sections {
        if color {
            output.push_str(&format!("{}\n", section.bold().underline()));
        } else {
            output.push_str(&format!("{}\n", section));
        }

        for record in records {
            let cells = Cells::of(record);
            let line = format!(
                "  {} {:<width$}  {:<16}  {:>8}  {:>10}  {}",
                colored_label(record.status, color),
                record.target,
                cells.last_success,
                cells.duration,
                cells.size,
                cells.comment,
                width = width,
            );
            output.push_str(line.trim_end());
            output.push('\n');
        }
        output.push('\n');
    }

    output
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn html_colour(status: Status) -> &'static str {
    match status {
        Status::Ok => "#2e7d32",
        Status::Unknown => "#f9a825",
        Status::Error => "#c62828",
    }
}

/// Standalone HTML document with one table per section.
pub fn render_html(report: &StatusReport) -> String {
    let title = escape_html(&subject(report));
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", title));
    html.push_str(
        "<style>\n\
         body { font-family: sans-serif; }\n\
         table { border-collapse: collapse; margin-bottom: 1.5em; }\n\
         th, td { border: 1px solid #ccc; padding: 2px 8px; text-align: left; }\n\
         td.status { color: #fff; font-weight: bold; }\n\
         </style>\n",
    );
    html.push_str("</head>\n<body>\n");
    html.push_str(&format!("<h1>{}</h1>\n", title));

    if report.is_empty() {
        html.push_str("<p>No backup targets found</p>\n");
    }

    for (section, records) in &report.sections {
        html.push_str(&format!("<h2>{}</h2>\n<table>\n", escape_html(section)));
        html.push_str(
            "<tr><th>Status</th><th>Target</th><th>Last success</th>\
             <th>Duration</th><th>Size</th><th>Comment</th></tr>\n",
        );
        for record in records {
            let cells = Cells::of(record);
            html.push_str(&format!(
                "<tr><td class=\"status\" style=\"background: {}\">{}</td>\
                 <td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                html_colour(record.status),
                record.status.label(),
                escape_html(&record.target),
                escape_html(&cells.last_success),
                escape_html(&cells.duration),
                escape_html(&cells.size),
                escape_html(&cells.comment),
            ));
        }
        html.push_str("</table>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Pretty-printed JSON of the whole report.
pub fn render_json(report: &StatusReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
