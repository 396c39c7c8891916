/// Process configuration, read once at startup from the environment
/// (a `.env` file is honored when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub token_ttl_minutes: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let _ = dotenv::dotenv();

        let database_url =
            dotenv::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_owned());
        let bind_addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
        let token_ttl_minutes = match dotenv::var("TOKEN_TTL_MINUTES") {
            Ok(raw) => raw.parse()?,
            Err(_) => 30,
        };

        Ok(Config {
            database_url,
            bind_addr,
            token_ttl_minutes,
        })
    }
}
