use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: IpAddr,
    pub server_port: u16,
    pub environment: Environment,
    pub log_level: String,
    /// Public base URL of the site, used to build activation links and callback URLs.
    pub app_url: String,
    /// Secret used to sign OAuth `state` values.
    pub app_secret: String,
    pub session_cookie: String,
    pub session_ttl_secs: u64,
    pub pending_link_ttl_secs: u64,
    /// Role attached to every newly registered account.
    pub default_role_id: i32,
    pub activation_token_ttl_hours: i64,
    pub login_max_attempts: u32,
    /// Failed logins one client address may make across all identifiers.
    pub login_max_attempts_per_origin: u32,
    pub login_lockout_secs: u64,
    /// Take the client address from `X-Forwarded-For`/`X-Real-IP`. Only safe
    /// behind a reverse proxy that overwrites these headers.
    pub trust_proxy_headers: bool,
    /// Upper bound for every call to the database, the mail API and login providers.
    pub io_timeout_secs: u64,
    pub providers: Vec<ProviderCredentials>,
    pub mail: MailSettings,
}

/// Deployment environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// OAuth client credentials for one login provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Outgoing mail settings. Without an API URL mails are only logged.
#[derive(Debug, Clone, Default)]
pub struct MailSettings {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
}

/// Login providers the site knows how to talk to.
pub const KNOWN_PROVIDERS: [&str; 2] = ["github", "google"];

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required: `DATABASE_URL`
    /// Optional with defaults: everything else, see `.env.example`.
    ///
    /// A login provider is enabled only when its `<PROVIDER>_CLIENT_ID` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is not set, or if a numeric or address
    /// variable contains an invalid value.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let environment = match std::env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .as_str()
        {
            "production" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        };

        let server_port = std::env::var("PORT")
            .or_else(|_| std::env::var("SERVER_PORT"))
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| anyhow::anyhow!("SERVER_PORT / PORT must be a valid u16"))?;

        let default_host = if environment == Environment::Production {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        };

        let server_host = std::env::var("SERVER_HOST")
            .unwrap_or_else(|_| default_host.to_string())
            .parse::<IpAddr>()
            .map_err(|_| anyhow::anyhow!("SERVER_HOST must be a valid IP address"))?;

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let app_url = std::env::var("APP_URL")
            .unwrap_or_else(|_| format!("http://localhost:{server_port}"))
            .trim_end_matches('/')
            .to_string();

        let app_secret = std::env::var("APP_SECRET")
            .map_err(|_| anyhow::anyhow!("APP_SECRET must be set"))?;
        if app_secret.len() < 32 {
            return Err(anyhow::anyhow!("APP_SECRET must be at least 32 characters"));
        }

        let providers = KNOWN_PROVIDERS
            .iter()
            .filter_map(|name| provider_from_env(name, &app_url))
            .collect();

        let mail = MailSettings {
            api_url: std::env::var("MAIL_API_URL").ok().filter(|v| !v.is_empty()),
            api_key: std::env::var("MAIL_API_KEY").ok().filter(|v| !v.is_empty()),
            from: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "no-reply@localhost".to_string()),
        };

        Ok(Self {
            database_url,
            server_host,
            server_port,
            environment,
            log_level,
            app_url,
            app_secret,
            session_cookie: std::env::var("SESSION_COOKIE")
                .unwrap_or_else(|_| "community_session".to_string()),
            session_ttl_secs: parse_env("SESSION_TTL_SECS", 7200)?,
            pending_link_ttl_secs: parse_env("PENDING_LINK_TTL_SECS", 600)?,
            default_role_id: parse_env("DEFAULT_ROLE_ID", 100)?,
            activation_token_ttl_hours: parse_env("ACTIVATION_TOKEN_TTL_HOURS", 72)?,
            login_max_attempts: parse_env("LOGIN_MAX_ATTEMPTS", 5)?,
            login_max_attempts_per_origin: parse_env("LOGIN_MAX_ATTEMPTS_PER_ORIGIN", 20)?,
            login_lockout_secs: parse_env("LOGIN_LOCKOUT_SECS", 60)?,
            trust_proxy_headers: parse_env("TRUST_PROXY_HEADERS", false)?,
            io_timeout_secs: parse_env("IO_TIMEOUT_SECS", 10)?,
            providers,
            mail,
        })
    }

    /// Build the socket address for the server to bind to.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_host, self.server_port)
    }

    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Credentials of an enabled login provider.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&ProviderCredentials> {
        self.providers.iter().find(|p| p.name == name)
    }
}

fn provider_from_env(name: &str, app_url: &str) -> Option<ProviderCredentials> {
    let prefix = name.to_uppercase();
    let client_id = std::env::var(format!("{prefix}_CLIENT_ID"))
        .ok()
        .filter(|v| !v.is_empty())?;
    let client_secret = std::env::var(format!("{prefix}_CLIENT_SECRET")).unwrap_or_default();
    let redirect_uri = std::env::var(format!("{prefix}_REDIRECT_URI"))
        .unwrap_or_else(|_| format!("{app_url}/auth/{name}/callback"));

    Some(ProviderCredentials {
        name: name.to_string(),
        client_id,
        client_secret,
        redirect_uri,
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: String::new(),
            server_host: IpAddr::from([127, 0, 0, 1]),
            server_port: 3000,
            environment: Environment::Development,
            log_level: "info".to_string(),
            app_url: "https://community.test".to_string(),
            app_secret: "x".repeat(32),
            session_cookie: "community_session".to_string(),
            session_ttl_secs: 7200,
            pending_link_ttl_secs: 600,
            default_role_id: 100,
            activation_token_ttl_hours: 72,
            login_max_attempts: 5,
            login_max_attempts_per_origin: 20,
            login_lockout_secs: 60,
            trust_proxy_headers: false,
            io_timeout_secs: 10,
            providers: vec![ProviderCredentials {
                name: "github".to_string(),
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "https://community.test/auth/github/callback".to_string(),
            }],
            mail: MailSettings::default(),
        }
    }

    #[test]
    fn test_socket_addr() {
        let addr = config().socket_addr();
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_provider_lookup() {
        let config = config();
        assert!(config.provider("github").is_some());
        assert!(config.provider("google").is_none());
    }

    #[test]
    fn test_parse_env_default() {
        let value: u64 = parse_env("COMMUNITY_API_TEST_UNSET_VARIABLE", 42).unwrap_or_default();
        assert_eq!(value, 42);
    }
}
