//! Login form served for a pending authorization.

/// Render the login form for the authorization identified by `state`.
///
/// Every interpolated value is escaped.
pub fn render_login_page(
    action_url: &str,
    state: &str,
    scopes: &[String],
    username_hint: &str,
    error_message: Option<&str>,
) -> String {
    let notice = match error_message {
        Some(msg) => format!(r#"<p class="error" role="alert">{}</p>"#, html_escape(msg)),
        None => String::new(),
    };

    let requested = if scopes.is_empty() {
        "none".to_string()
    } else {
        scopes.join(" ")
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Notebook MCP Authentication</title>
<style>
body {{ font-family: system-ui, sans-serif; background: #eef1f4; color: #222; }}
main {{ max-width: 360px; margin: 10vh auto; background: #fff; padding: 28px 32px; border: 1px solid #d5dae0; border-radius: 6px; }}
h2 {{ margin-top: 0; font-size: 18px; }}
.scopes {{ background: #f0f0f0; padding: 8px 10px; border-radius: 4px; font-size: 14px; }}
.error {{ color: #b00020; font-size: 14px; }}
label, input {{ display: block; width: 100%; box-sizing: border-box; }}
label {{ margin: 14px 0 4px; font-size: 14px; }}
input {{ padding: 8px; border: 1px solid #c4c9cf; border-radius: 4px; }}
button {{ margin-top: 18px; width: 100%; padding: 9px; border: 0; border-radius: 4px; background: #2e7d32; color: #fff; cursor: pointer; }}
</style>
</head>
<body>
<main>
<h2>Notebook MCP Authentication</h2>
{notice}
<p class="scopes"><strong>Requested scopes:</strong> {requested}</p>
<form method="POST" action="{action}">
<input type="hidden" name="state" value="{state}">
<label for="username">Username</label>
<input id="username" name="username" type="text" value="{username}" required>
<label for="password">Password</label>
<input id="password" name="password" type="password" required autofocus>
<button type="submit">Sign In</button>
</form>
</main>
</body>
</html>"#,
        notice = notice,
        requested = html_escape(&requested),
        action = html_escape(action_url),
        state = html_escape(state),
        username = html_escape(username_hint),
    )
}

/// Escape text for use in HTML content and attribute values.
pub(crate) fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
