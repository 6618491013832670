use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub gmail: GmailConfig,
    pub download: DownloadConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GmailConfig {
    pub credentials_path: String,
    pub token_cache_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    pub root: String,
    pub page_size: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Config {
    pub fn new() -> Result<Self> {
        // Vérifier que les variables essentielles sont définies
        Self::check_required_env_vars()?;

        // Configuration chargée depuis les variables d'environnement
        Ok(Config {
            gmail: GmailConfig {
                credentials_path: std::env::var("GMAIL_CREDENTIALS_PATH")
                    .expect("GMAIL_CREDENTIALS_PATH doit être défini"),
                token_cache_path: std::env::var("GMAIL_TOKEN_CACHE_PATH")
                    .unwrap_or_else(|_| "./gmail-token-cache.json".to_string()),
            },
            download: DownloadConfig {
                root: std::env::var("DOWNLOAD_DIR")
                    .unwrap_or_else(|_| "./attachments".to_string()),
                page_size: std::env::var("PAGE_SIZE")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .unwrap_or(100),
            },
            retry: RetryConfig {
                max_retries: std::env::var("RETRY_MAX_RETRIES")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                base_delay_ms: std::env::var("RETRY_BASE_DELAY_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
            },
        })
    }

    fn check_required_env_vars() -> Result<()> {
        let required_vars = [
            "GMAIL_CREDENTIALS_PATH",
        ];

        let mut missing_vars = Vec::new();

        for var in &required_vars {
            if std::env::var(var).is_err() {
                missing_vars.push(*var);
            }
        }

        if !missing_vars.is_empty() {
            anyhow::bail!(
                "Variables d'environnement manquantes: {}\n\
                 \n\
                 💡 Solutions :\n\
                 1. Créer un fichier .env avec vos credentials :\n\
                    cp .env.example .env\n\
                    # Puis éditer .env avec vos valeurs\n\
                 \n\
                 2. Ou définir les variables manuellement :\n\
                    export GMAIL_CREDENTIALS_PATH=/path/to/client_credentials.json\n\
                    export GMAIL_TOKEN_CACHE_PATH=./gmail-token-cache.json\n\
                    cargo run -- --start-date 2024-01-01 --end-date 2024-01-31",
                missing_vars.join(", ")
            );
        }

        Ok(())
    }
}
