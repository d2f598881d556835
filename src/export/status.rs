use std::collections::BTreeMap;
use std::fmt::Write;

use crate::metrics::SwitchStatus;
use crate::model::ErrorKind;

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>gNMI Exporter Status</title>
    <style>
        table { border-collapse: collapse; width: 80%; margin: 20px auto; }
        th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }
        th { background-color: #f2f2f2; }
        tr:nth-child(even) { background-color: #f9f9f9; }
    </style>
</head>
<body>
    <h1>gNMI Exporter Switch Status</h1>
    <table>
        <tr>
            <th>Device</th>
            <th>Connected</th>
            <th>Subscribed</th>
            <th>Errors (connect/subscribe/parse/panic)</th>
        </tr>
"#;

const PAGE_TAIL: &str = "    </table>\n</body>\n</html>\n";

/// Renders the switch status table. Rows follow the map order (sorted by address).
pub fn render(statuses: &BTreeMap<String, SwitchStatus>) -> String {
    let mut page = String::with_capacity(PAGE_HEAD.len() + PAGE_TAIL.len() + statuses.len() * 160);
    page.push_str(PAGE_HEAD);

    for (device, status) in statuses {
        let errors = ErrorKind::all()
            .iter()
            .map(|kind| status.error_count(*kind).to_string())
            .collect::<Vec<_>>()
            .join("/");

        // Writing to a String cannot fail.
        let _ = write!(
            page,
            "        <tr>\n            <td>{}</td>\n            <td>{}</td>\n            <td>{}</td>\n            <td>{}</td>\n        </tr>\n",
            escape_html(device),
            yes_no(status.connected),
            yes_no(status.subscribed),
            errors,
        );
    }

    page.push_str(PAGE_TAIL);
    page
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "Yes"
    } else {
        "No"
    }
}

/// Escapes text for inclusion in HTML element content.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
