use super::DecisionRecord;

/// Repository path of the rendered decision log.
pub const DECISION_LOG_PATH: &str = "docs/DECISIONS.md";

/// Render records as numbered, ADR-style markdown sections.
pub fn render_markdown(project_name: &str, records: &[DecisionRecord]) -> String {
    let mut out = format!("# Decision Log: {}\n\n", project_name);

    if records.is_empty() {
        out.push_str("_No decisions were recorded._\n");
        return out;
    }

    for (i, record) in records.iter().enumerate() {
        out.push_str(&format!("## {:03}. {}\n\n", i + 1, record.title));
        out.push_str(&format!(
            "- **Category:** {}\n- **Recorded:** {}\n\n",
            record.category.as_str(),
            record.recorded_at.format("%Y-%m-%d %H:%M UTC")
        ));
        if !record.context.is_empty() {
            out.push_str(&format!("### Context\n\n{}\n\n", record.context));
        }
        out.push_str(&format!("### Decision\n\n{}\n\n", record.decision));
        if !record.rationale.is_empty() {
            out.push_str(&format!("### Rationale\n\n{}\n\n", record.rationale));
        }
        push_list(&mut out, "Alternatives considered", &record.alternatives);
        push_list(&mut out, "Consequences", &record.consequences);
        if !record.related_files.is_empty() {
            let files: Vec<String> = record
                .related_files
                .iter()
                .map(|f| format!("`{}`", f))
                .collect();
            out.push_str(&format!("**Related files:** {}\n\n", files.join(", ")));
        }
    }

    out
}

fn push_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("### {}\n\n", heading));
    for item in items {
        out.push_str(&format!("- {}\n", item));
    }
    out.push('\n');
}
