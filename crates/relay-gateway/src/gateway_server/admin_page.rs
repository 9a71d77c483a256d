//! Server-rendered admin page.

use super::*;

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn render_bool_select(name: &str, value: bool) -> String {
    let (true_selected, false_selected) = if value {
        (" selected", "")
    } else {
        ("", " selected")
    };
    format!(
        r#"<select name="{name}"><option value="true"{true_selected}>true</option><option value="false"{false_selected}>false</option></select>"#
    )
}

fn render_table_rows(
    admin_base: &str,
    rows: &[TableRow],
    edit_action: &str,
    delete_action: &str,
    field_names: [&str; 3],
) -> String {
    let mut html = String::new();
    for (position, row) in rows.iter().enumerate() {
        let inputs = field_names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                format!(
                    r#"<td><input name="{name}" value="{}" form="{edit_action}-{position}" /></td>"#,
                    escape_html(row.column(index))
                )
            })
            .collect::<String>();
        html.push_str(&format!(
            r#"<tr><td>{position}</td>{inputs}<td>
  <form id="{edit_action}-{position}" method="post" action="{admin_base}/{edit_action}/{position}"><button type="submit">Save</button></form>
  <form method="post" action="{admin_base}/{delete_action}/{position}"><button type="submit">Delete</button></form>
</td></tr>
"#
        ));
    }
    html
}

pub(super) fn render_admin_page(admin_base: &str, view: &AdminStateView) -> String {
    let admin_base = escape_html(admin_base);
    let account_rows = render_table_rows(
        &admin_base,
        &view.accounts,
        "edit-account",
        "delete-account",
        ["account", "password", "token"],
    );
    let user_rows = render_table_rows(
        &admin_base,
        &view.users,
        "edit-user",
        "delete-user",
        ["user", "key", "note"],
    );
    let error_tokens = view
        .error_tokens
        .iter()
        .map(|token| format!("<li><code>{}</code></li>", escape_html(&mask_token(token))))
        .collect::<String>();
    let config = &view.config;
    let auth_key_placeholder = match &config.auth_key {
        Some(masked) => format!("set ({}), type None to clear", escape_html(masked)),
        None => "not set".to_string(),
    };
    let user_agents = serde_json::to_string(&config.user_agents).unwrap_or_default();

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Relay Gateway Admin</title>
  <style>
    body {{
      margin: 0;
      font-family: "IBM Plex Sans", "Segoe UI", sans-serif;
      background: #f4f6f8;
      color: #13232f;
    }}
    .container {{
      max-width: 1080px;
      margin: 0 auto;
      padding: 1.5rem;
    }}
    section {{
      background: #ffffff;
      border: 1px solid #d5dde5;
      border-radius: 8px;
      padding: 1rem;
      margin-bottom: 1rem;
    }}
    table {{
      width: 100%;
      border-collapse: collapse;
    }}
    td, th {{
      padding: 0.25rem 0.5rem;
      text-align: left;
    }}
    td form {{
      display: inline;
    }}
    textarea {{
      width: 100%;
      min-height: 6rem;
    }}
  </style>
</head>
<body>
<div class="container">
  <h1>Relay Gateway Admin</h1>
  <p>Available tokens: <strong>{tokens_count}</strong>, errored tokens: <strong>{errored_count}</strong>, refreshed: <strong>{refresh_records}</strong></p>

  <section id="tab-1">
    <h2>Accounts</h2>
    <form method="post" action="{admin_base}/upload-account">
      <textarea name="text" placeholder="account,password,token"></textarea>
      <button type="submit">Upload</button>
    </form>
    <table>
      <tr><th>#</th><th>Account</th><th>Password</th><th>Token</th><th></th></tr>
{account_rows}    </table>
    <form method="post" action="{admin_base}/delete-all-accounts"><button type="submit">Delete all accounts</button></form>
    <h3>Errored tokens</h3>
    <ul>{error_tokens}</ul>
  </section>

  <section id="tab-2">
    <h2>Users</h2>
    <form method="post" action="{admin_base}/upload-user">
      <textarea name="text" placeholder="user,key,note"></textarea>
      <button type="submit">Upload</button>
    </form>
    <table>
      <tr><th>#</th><th>User</th><th>Key</th><th>Note</th><th></th></tr>
{user_rows}    </table>
    <form method="post" action="{admin_base}/delete-all-users"><button type="submit">Delete all users</button></form>
  </section>

  <section id="tab-3">
    <h2>Config</h2>
    <form method="post" action="{admin_base}/update-config">
      <p><label>Upstream base URLs <input name="chatgpt_base_url" value="{chatgpt_base_url}" /></label></p>
      <p><label>Proxy URLs <input name="proxy_url" value="{proxy_url}" /></label></p>
      <p><label>Retry times <input name="retry_times" type="number" min="0" value="{retry_times}" /></label></p>
      <p><label>Enable limit {enable_limit}</label></p>
      <p><label>Scheduled refresh {scheduled_refresh}</label></p>
      <p><label>Auth key <input name="auth_key" placeholder="{auth_key_placeholder}" /></label></p>
      <p><label>User agents <input name="user_agents" value="{user_agents}" /></label></p>
      <p><label>History disabled {history_disabled}</label></p>
      <button type="submit">Save config</button>
    </form>
  </section>
</div>
</body>
</html>
"#,
        tokens_count = view.tokens_count,
        errored_count = view.error_tokens.len(),
        refresh_records = view.refresh_records,
        chatgpt_base_url = escape_html(&config.chatgpt_base_url),
        proxy_url = escape_html(&config.proxy_url),
        retry_times = config.retry_times,
        enable_limit = render_bool_select("enable_limit", config.enable_limit),
        scheduled_refresh = render_bool_select("scheduled_refresh", config.scheduled_refresh),
        user_agents = escape_html(&user_agents),
        history_disabled = render_bool_select("history_disabled", config.history_disabled),
    )
}
