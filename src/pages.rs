//! Server-rendered pages. Templates are compiled in; the only dynamic values are
//! the username on the dashboard and the token on the reset form, both escaped.

const LOGIN_HTML: &str = include_str!("../templates/login.html");
const DASHBOARD_HTML: &str = include_str!("../templates/dashboard.html");
const RESET_PASSWORD_HTML: &str = include_str!("../templates/reset_password.html");

pub fn login() -> &'static str {
    LOGIN_HTML
}

pub fn dashboard(username: &str) -> String {
    DASHBOARD_HTML.replace("{{username}}", &escape_html(username))
}

pub fn reset_password(token: &str) -> String {
    RESET_PASSWORD_HTML.replace("{{token}}", &escape_html(token))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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
