//! Text and JSON presentation of a [`Report`].

use std::fmt::Write;

use crate::items::{Category, Priority};
use crate::report::{CategorySection, Report};

const BANNER: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

fn heading(report: &Report) -> &'static str {
    match (report.has(Category::Skill), report.has(Category::Agent)) {
        (true, true) => "🎯 SKILLS & AGENTS ACTIVATION CHECK",
        (false, true) => "🤖 AGENTS ACTIVATION CHECK",
        _ => "🎯 SKILLS ACTIVATION CHECK",
    }
}

fn bucket_title(priority: Priority, label: &str) -> String {
    match priority {
        Priority::Critical => format!("⚠️  CRITICAL {label} (REQUIRED):"),
        Priority::High => format!("📚 RECOMMENDED {label}:"),
        Priority::Medium => format!("💡 SUGGESTED {label}:"),
        Priority::Low => format!("📌 OPTIONAL {label}:"),
    }
}

fn label_and_prefix(category: Category) -> (&'static str, &'static str) {
    match category {
        Category::Skill => ("SKILLS", ""),
        Category::Agent => ("AGENTS", "@"),
    }
}

fn write_section(out: &mut String, section: &CategorySection) {
    let (label, prefix) = label_and_prefix(section.category);

    for priority in Priority::ORDERED {
        let names = section.bucket(priority);
        if names.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{}", bucket_title(priority, label));
        for name in names {
            let _ = writeln!(out, "  → {prefix}{name}");
        }
        out.push('\n');
    }
}

fn action_line(report: &Report) -> Option<String> {
    let mut parts = Vec::new();

    if report.has(Category::Skill) {
        parts.push("Use Skill tool".to_string());
    }
    if let Some(agents) = report.category(Category::Agent) {
        let mentions: Vec<String> = agents.names().map(|n| format!("@{n}")).collect();
        if !mentions.is_empty() {
            parts.push(format!("Use {}", mentions.join(", ")));
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(format!("ACTION: {}", parts.join(" and ")))
    }
}

/// Human-readable activation checklist. An empty report renders as an
/// empty string so callers print nothing.
pub fn render_text(report: &Report) -> String {
    if report.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let _ = writeln!(out, "{BANNER}");
    let _ = writeln!(out, "{}", heading(report));
    let _ = writeln!(out, "{BANNER}");
    out.push('\n');

    for (i, section) in report.sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        write_section(&mut out, section);
    }

    if let Some(action) = action_line(report) {
        let _ = writeln!(out, "{action}");
    }
    let _ = writeln!(out, "{BANNER}");

    out
}

/// Pretty-printed JSON of the grouped report.
pub fn render_json(report: &Report) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
