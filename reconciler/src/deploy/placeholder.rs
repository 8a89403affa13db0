//! Static page served when content could not be synced

use chrono::{DateTime, Utc};

/// File name the placeholder is written to inside the web root
pub const PLACEHOLDER_FILE: &str = "index.html";

/// Render the "deployment failed" document
pub fn render(run_id: &str, log_location: &str, at: DateTime<Utc>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Deployment failed</title>
</head>
<body>
<h1>Deployment failed</h1>
<p>The site content could not be synchronized from its repository.</p>
<p>Run <code>{run_id}</code> at {at}. Details are in <code>{log}</code> on the deploying machine.</p>
</body>
</html>
"#,
        run_id = escape(run_id),
        at = at.format("%Y-%m-%d %H:%M:%S UTC"),
        log = escape(log_location),
    )
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
