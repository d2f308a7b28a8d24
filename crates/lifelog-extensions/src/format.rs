//! Result rendering shared by the domain extensions.

use lifelog_core::message::JsonMap;

/// Render query rows as a markdown table, capped at 20 rows.
pub(crate) fn markdown_table(rows: &[JsonMap]) -> String {
    if rows.is_empty() {
        return "_no matching records_".to_string();
    }

    let headers: Vec<&str> = rows[0].keys().map(|k| k.as_str()).collect();

    let mut out = String::new();
    out.push_str("| ");
    out.push_str(&headers.join(" | "));
    out.push_str(" |\n|");
    for _ in &headers {
        out.push_str("------|");
    }
    out.push('\n');

    for row in rows.iter().take(20) {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| match row.get(*h) {
                Some(serde_json::Value::Null) | None => String::new(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        out.push_str("| ");
        out.push_str(&cells.join(" | "));
        out.push_str(" |\n");
    }

    if rows.len() > 20 {
        out.push_str(&format!("\n_... {} more rows_\n", rows.len() - 20));
    }

    out
}
