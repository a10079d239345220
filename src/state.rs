use std::sync::Arc;

use crate::auth::memory::MemoryUserStore;
use crate::auth::repo::{PgUserStore, UserStore};
use crate::auth::services::AuthService;
use crate::config::AppConfig;
use crate::db;
use crate::mail::{LogMailer, Mailer, SmtpMailer};

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = match &config.database_url {
            Some(url) => Arc::new(PgUserStore::new(db::connect(url).await?)) as Arc<dyn UserStore>,
            None => {
                tracing::warn!("DATABASE_URL not set; users are kept in memory and lost on restart");
                Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>
            }
        };

        let mailer = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?) as Arc<dyn Mailer>,
            None => {
                tracing::warn!("SMTP_HOST not set; outgoing mail is only logged");
                Arc::new(LogMailer) as Arc<dyn Mailer>
            }
        };

        Ok(Self::from_parts(config, store, mailer))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let reset_ttl = time::Duration::minutes(config.reset_ttl_minutes);
        Self {
            auth: AuthService::new(store, mailer, reset_ttl),
            config,
        }
    }

    #[cfg(test)]
    pub fn fake(mailer: Arc<dyn Mailer>) -> Self {
        Self::fake_with_store(Arc::new(MemoryUserStore::new()), mailer)
    }

    #[cfg(test)]
    pub fn fake_with_store(store: Arc<MemoryUserStore>, mailer: Arc<dyn Mailer>) -> Self {
        let config = Arc::new(AppConfig {
            database_url: None,
            public_base_url: Some("http://auth.test".into()),
            cookie_secure: false,
            reset_ttl_minutes: 60,
            smtp: None,
        });
        Self::from_parts(config, store, mailer)
    }
}
