//! Audit export in a structured (JSON) and a flat (CSV) form.
//!
//! CSV output follows RFC 4180: a field containing a comma, quote, CR or LF
//! is wrapped in double quotes and embedded quotes are doubled. Both forms
//! parse back to the same ordered entries.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use super::{AuditLogEntry, AuditResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditExportFormat {
    Json,
    Csv,
}

impl FromStr for AuditExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => bail!("Unknown export format '{}'; expected json or csv", other),
        }
    }
}

pub const CSV_HEADER: [&str; 10] = [
    "id",
    "timestamp",
    "session_id",
    "agent_id",
    "action",
    "phase",
    "result",
    "detail",
    "duration_ms",
    "parameters",
];

pub fn export(entries: &[AuditLogEntry], format: AuditExportFormat) -> Result<String> {
    match format {
        AuditExportFormat::Json => to_json(entries),
        AuditExportFormat::Csv => Ok(to_csv(entries)),
    }
}

pub fn to_json(entries: &[AuditLogEntry]) -> Result<String> {
    serde_json::to_string_pretty(entries).context("Failed to serialize audit entries")
}

pub fn parse_json(content: &str) -> Result<Vec<AuditLogEntry>> {
    serde_json::from_str(content).context("Failed to parse audit JSON export")
}

pub fn to_csv(entries: &[AuditLogEntry]) -> String {
    let mut out = String::new();
    write_record(&mut out, CSV_HEADER.iter().map(|s| s.to_string()));
    for entry in entries {
        // BTreeMap<String, String> always serializes.
        let parameters = if entry.parameters.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&entry.parameters).unwrap_or_default()
        };
        write_record(
            &mut out,
            [
                entry.id.to_string(),
                entry.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                entry.session_id.clone(),
                entry.agent_id.clone().unwrap_or_default(),
                entry.action.clone(),
                entry.phase.clone(),
                entry.result.as_str().to_string(),
                entry.detail.clone(),
                entry.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
                parameters,
            ],
        );
    }
    out
}

fn write_record(out: &mut String, fields: impl IntoIterator<Item = String>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&escape_field(&field));
    }
    out.push_str("\r\n");
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split CSV text into records of fields, honouring quoted fields.
pub fn split_records(content: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => {
                in_quotes = true;
                field_started = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                field_started = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
                field_started = false;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }
    if in_quotes {
        bail!("Unterminated quoted field");
    }
    if field_started || !field.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

pub fn parse_csv(content: &str) -> Result<Vec<AuditLogEntry>> {
    let mut records = split_records(content)?.into_iter();
    let header = records.next().ok_or_else(|| anyhow!("CSV export is empty"))?;
    if header != CSV_HEADER {
        bail!("Unexpected CSV header: {}", header.join(","));
    }

    records
        .enumerate()
        .map(|(i, fields)| parse_row(&fields).with_context(|| format!("Invalid CSV row {}", i + 2)))
        .collect()
}

fn parse_row(fields: &[String]) -> Result<AuditLogEntry> {
    let [
        id,
        timestamp,
        session_id,
        agent_id,
        action,
        phase,
        result,
        detail,
        duration_ms,
        parameters,
    ] = fields
    else {
        bail!("expected {} fields, found {}", CSV_HEADER.len(), fields.len());
    };

    let parameters: BTreeMap<String, String> = if parameters.is_empty() {
        BTreeMap::new()
    } else {
        serde_json::from_str(parameters).context("parameters is not a JSON object")?
    };

    Ok(AuditLogEntry {
        id: Uuid::parse_str(id).context("invalid id")?,
        timestamp: DateTime::parse_from_rfc3339(timestamp)
            .context("invalid timestamp")?
            .with_timezone(&Utc),
        session_id: session_id.clone(),
        agent_id: (!agent_id.is_empty()).then(|| agent_id.clone()),
        action: action.clone(),
        phase: phase.clone(),
        result: AuditResult::parse(result).ok_or_else(|| anyhow!("invalid result '{}'", result))?,
        detail: detail.clone(),
        duration_ms: if duration_ms.is_empty() {
            None
        } else {
            Some(duration_ms.parse().context("invalid duration_ms")?)
        },
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample() -> Vec<AuditLogEntry> {
        vec![
            AuditLogEntry::new("s1", "session_created", "intake", AuditResult::Success),
            AuditLogEntry::new("s1", "module_executed", "executing", AuditResult::Failure)
                .agent("orchestrator")
                .detail("failed, said \"no\"\nsecond line")
                .duration(Duration::from_millis(1500))
                .param("module", "readme")
                .param("note", "a,b"),
            AuditLogEntry::new("s1", "step_skipped", "executing", AuditResult::Skipped),
            AuditLogEntry::new("s1", "llm_reply", "intake", AuditResult::Failure).agent(""),
        ]
    }

    #[test]
    fn test_json_round_trip_preserves_order() {
        let entries = sample();
        let json = export(&entries, AuditExportFormat::Json).unwrap();
        assert_eq!(parse_json(&json).unwrap(), entries);
    }

    #[test]
    fn test_csv_round_trip() {
        let entries = sample();
        let csv = to_csv(&entries);
        assert_eq!(parse_csv(&csv).unwrap(), entries);
    }

    #[test]
    fn test_tricky_detail_is_one_record() {
        let entry = AuditLogEntry::new("s1", "note", "planning", AuditResult::Success)
            .detail("comma, \"quote\" and\nnewline");
        let csv = to_csv(std::slice::from_ref(&entry));

        let records = split_records(&csv).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].len(), CSV_HEADER.len());
        assert_eq!(records[1][7], "comma, \"quote\" and\nnewline");
        assert!(csv.contains("\"comma, \"\"quote\"\" and\nnewline\""));
    }

    #[test]
    fn test_empty_export_has_header_only() {
        let csv = to_csv(&[]);
        assert_eq!(parse_csv(&csv).unwrap(), Vec::<AuditLogEntry>::new());
        assert_eq!(parse_json(&to_json(&[]).unwrap()).unwrap(), vec![]);
    }

    #[test]
    fn test_rejects_malformed_csv() {
        assert!(parse_csv("").is_err());
        assert!(parse_csv("wrong,header\r\n").is_err());
        let mut csv = to_csv(&sample());
        csv.push_str("\"unterminated");
        assert!(parse_csv(&csv).is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("CSV".parse::<AuditExportFormat>().unwrap(), AuditExportFormat::Csv);
        assert!("xml".parse::<AuditExportFormat>().is_err());
    }
}
