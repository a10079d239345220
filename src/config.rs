use anyhow::Context;

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    Tls,
    StartTls,
    None,
}

impl std::str::FromStr for SmtpSecurity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls" | "ssl" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            "none" | "plain" => Ok(Self::None),
            other => anyhow::bail!("unknown SMTP_SECURITY value: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub security: SmtpSecurity,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub public_base_url: Option<String>,
    pub cookie_secure: bool,
    pub reset_ttl_minutes: i64,
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = non_empty_var("DATABASE_URL");
        let public_base_url = non_empty_var("PUBLIC_BASE_URL");
        let cookie_secure = std::env::var("COOKIE_SECURE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let reset_ttl_minutes = std::env::var("RESET_TOKEN_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|m| *m > 0)
            .unwrap_or(60);

        let smtp = match non_empty_var("SMTP_HOST") {
            Some(host) => {
                let port = match non_empty_var("SMTP_PORT") {
                    Some(p) => Some(p.parse::<u16>().context("parse SMTP_PORT")?),
                    None => None,
                };
                let username = non_empty_var("SMTP_USERNAME");
                let password = non_empty_var("SMTP_PASSWORD");
                let from = non_empty_var("SMTP_FROM")
                    .or_else(|| username.clone())
                    .unwrap_or_else(|| "no-reply@localhost".into());
                let security = non_empty_var("SMTP_SECURITY")
                    .map(|v| v.parse::<SmtpSecurity>())
                    .transpose()?
                    .unwrap_or(SmtpSecurity::StartTls);
                Some(SmtpConfig {
                    host,
                    port,
                    username,
                    password,
                    from,
                    security,
                })
            }
            None => None,
        };

        Ok(Self {
            database_url,
            public_base_url,
            cookie_secure,
            reset_ttl_minutes,
            smtp,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
