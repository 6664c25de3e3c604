use clap::Parser;

pub const ENV_DEV: &str = "dev";
pub const ENV_TEST: &str = "test";

/// CLI flags; every value falls back to the corresponding environment
/// variable, then to a default.
#[derive(Debug, Default, Parser)]
#[command(name = "gitwatch-api")]
#[command(about = "Mirrors upstream repositories into Postgres and serves the local copy")]
pub struct Args {
    /// HTTP listen host (env: APISERVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP listen port (env: APISERVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Periodic task configuration file (env: CRON_CONFIG_PATH)
    #[arg(long)]
    pub cron_file: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub app_env: String,
    pub host: String,
    pub port: u16,
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub cors_whitelist: Vec<String>,
    pub github_base_url: String,
    pub github_token: Option<String>,
    pub cron_file: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_port(key: &str, default: u16) -> anyhow::Result<u16> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} is not a valid port: {raw:?}")),
    }
}

impl Config {
    /// Merge environment variables with CLI overrides. `APP_ENV=test` selects
    /// the test database port.
    pub fn load(args: Args) -> anyhow::Result<Self> {
        let app_env = env_or("APP_ENV", ENV_DEV);
        let db_port = if app_env == ENV_TEST {
            env_port("DB_PORT_TEST", 5433)?
        } else {
            env_port("DB_PORT", 5432)?
        };

        let cors_whitelist = env_or("CORS_WHITELIST", "")
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            app_env,
            host: args
                .host
                .unwrap_or_else(|| env_or("APISERVER_HOST", "127.0.0.1")),
            port: match args.port {
                Some(port) => port,
                None => env_port("APISERVER_PORT", 8080)?,
            },
            db_host: env_or("DB_HOST", "127.0.0.1"),
            db_port,
            db_user: env_or("DB_USER", "postgres"),
            db_password: env_or("DB_PASSWORD", "postgres"),
            db_name: env_or("DB_NAME", "gitwatch"),
            redis_host: env_or("REDIS_HOST", "127.0.0.1"),
            redis_port: env_port("REDIS_PORT", 6379)?,
            cors_whitelist,
            github_base_url: env_or("GITHUB_BASE_URL", "https://api.github.com/repos"),
            github_token: std::env::var("GITHUB_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),
            cron_file: args
                .cron_file
                .unwrap_or_else(|| env_or("CRON_CONFIG_PATH", "./cron.yaml")),
        })
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
