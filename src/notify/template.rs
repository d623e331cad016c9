// src/notify/template.rs
//! HTML bodies for alert and summary mails. Messages never leave the store
//! in plaintext; mails carry severity, location and a detail link only.

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::config::Settings;
use crate::store::WindowStats;
use crate::types::Severity;

pub fn detail_link(settings: &Settings, id: i64) -> String {
    format!("{}/{}", settings.detail_url.trim_end_matches('/'), id)
}

pub fn alert_subject(settings: &Settings, severity: &Severity) -> String {
    format!(
        "System Alert: [{}] on {}",
        severity.as_str().to_uppercase(),
        settings.site_name
    )
}

pub fn render_alert(settings: &Settings, id: i64, severity: &Severity) -> String {
    let level = severity.as_str().to_uppercase();
    let site = encode_text(&settings.site_name);
    let link = detail_link(settings, id);

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><title>System Alert: {level}</title></head>
<body style="font-family: sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px; border: 1px solid #ddd; border-radius: 5px;">
    <h2 style="color: #d63638;">System Alert: {level}</h2>
    <p>Hello Admin, a new error has been recorded on <strong>{site}</strong>.</p>
    <div style="background: #f9f9f9; padding: 15px; border-left: 4px solid #d63638; margin: 20px 0;">
      <p style="margin: 0;"><strong>Severity:</strong> {level}</p>
    </div>
    <p><a href="{href}" style="background-color: #0073aa; color: #fff; padding: 10px 15px; text-decoration: none; border-radius: 3px; display: inline-block;">View details</a></p>
    <hr style="border: 0; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="font-size: 12px; color: #777;">Sent by {site} Logwarden</p>
  </div>
</body>
</html>
"#,
        level = encode_text(&level),
        site = site,
        href = encode_double_quoted_attribute(&link),
    )
}

pub fn summary_subject(settings: &Settings) -> String {
    format!("Weekly error summary - {}", settings.site_name)
}

pub fn render_summary(settings: &Settings, stats: &WindowStats) -> String {
    let site = encode_text(&settings.site_name);
    let list_link = settings.detail_url.trim_end_matches('/').to_string();

    let rows: String = stats
        .top
        .iter()
        .map(|event| {
            let location = match (&event.source_file, event.source_line) {
                (Some(file), Some(line)) => format!("{}:{}", file, line),
                (Some(file), None) => file.clone(),
                _ => "-".to_string(),
            };
            format!(
                "      <tr><td>{}</td><td>{}</td><td>{}</td><td><a href=\"{}\">#{}</a></td></tr>\n",
                encode_text(&event.severity.as_str().to_uppercase()),
                encode_text(&location),
                event.occurrence_count,
                encode_double_quoted_attribute(&detail_link(settings, event.id)),
                event.id,
            )
        })
        .collect();

    let table = if rows.is_empty() {
        "    <p>No errors were recorded this week.</p>\n".to_string()
    } else {
        format!(
            "    <table style=\"border-collapse: collapse;\">\n      <tr><th>Severity</th><th>Location</th><th>Occurrences</th><th></th></tr>\n{}    </table>\n",
            rows
        )
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><title>Weekly error summary</title></head>
<body style="font-family: sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Weekly error summary for {site}</h2>
    <ul>
      <li>Distinct errors seen this week: <strong>{active}</strong></li>
      <li>New errors this week: <strong>{new}</strong></li>
      <li>Unresolved errors: <strong>{unresolved}</strong></li>
    </ul>
{table}    <p><a href="{href}">View all errors</a></p>
  </div>
</body>
</html>
"#,
        site = site,
        active = stats.active,
        new = stats.new,
        unresolved = stats.unresolved,
        table = table,
        href = encode_double_quoted_attribute(&list_link),
    )
}
