use anyhow::Result;
use clap::Parser;
use log::{error, info};

mod config;
mod download_log;
mod downloader;
mod error;
mod extractor;
mod gmail_client;
mod paginator;
mod provider;
mod query;
mod storage;

use config::Config;
use downloader::{Downloader, RunOptions};
use gmail_client::GmailClient;
use query::SearchQuery;

#[derive(Parser)]
#[command(name = "mailstash")]
#[command(about = "Download Gmail attachments for a date range into dated folders")]
#[command(version = "0.1.0")]
struct Args {
    /// Start of the date range (YYYY-MM-DD)
    #[arg(short, long)]
    start_date: String,

    /// End of the date range (YYYY-MM-DD, exclusive in Gmail's before: sense)
    #[arg(short, long)]
    end_date: String,

    /// Extra Gmail search filter appended to the query
    /// (e.g. "from:billing@example.com filename:pdf")
    #[arg(short, long)]
    query: Option<String>,

    /// Download root directory (par défaut: ./attachments)
    #[arg(short = 'o', long, default_value = "./attachments")]
    download_dir: String,

    /// Messages per search page
    #[arg(short, long, default_value_t = 100)]
    page_size: u32,

    /// Limite du nombre de messages à télécharger (par défaut: illimité)
    #[arg(short, long)]
    limit: Option<usize>,

    /// Mode dry-run : liste les pièces jointes sans rien écrire
    #[arg(long)]
    dry_run: bool,

    /// Vérifier la configuration sans se connecter
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger le fichier .env s'il existe
    dotenv::dotenv().ok();

    // Parser les arguments CLI
    let args = Args::parse();

    // Initialiser le logging
    env_logger::init();

    if args.dry_run {
        info!("🧪 Démarrage en mode DRY-RUN de mailstash");
    } else {
        info!("🚀 Démarrage de mailstash");
    }

    // Charger la configuration
    let mut config = Config::new()?;

    // Si demandé, vérifier seulement la configuration
    if args.check_config {
        println!("✅ Configuration valide !");
        println!("📧 Gmail API OAuth2");
        println!("🔑 Credentials: {}", config.gmail.credentials_path);
        println!("💾 Token cache: {}", config.gmail.token_cache_path);
        println!("📁 Download dir: {}", config.download.root);
        println!("📄 Page size: {}", config.download.page_size);
        println!(
            "🔁 Retries: {} (base delay {} ms)",
            config.retry.max_retries, config.retry.base_delay_ms
        );
        return Ok(());
    }

    // Remplacer les valeurs de config par celles des arguments CLI si fournies
    if args.download_dir != "./attachments" {
        config.download.root = args.download_dir.clone();
    }
    if args.page_size != 100 {
        config.download.page_size = args.page_size;
    }

    // Valider les dates avant tout appel réseau
    let query = SearchQuery::parse(&args.start_date, &args.end_date, args.query.as_deref())?;

    let client = GmailClient::new(&config.gmail).await?;

    let mut downloader =
        Downloader::new(&client, &config.download.root, config.retry.clone())?;

    let options = RunOptions {
        query,
        page_size: config.download.page_size,
        limit: args.limit,
        dry_run: args.dry_run,
    };

    match downloader.run(&options).await {
        Ok(summary) => {
            println!("\n{}", "=".repeat(60));
            println!("🏁 DOWNLOAD SUMMARY");
            println!("{}", "=".repeat(60));
            println!("📧 Messages processed: {}", summary.messages_processed);
            println!("📎 Attachments saved:  {}", summary.attachments_saved);
            println!("❌ Errors:             {}", summary.errors);
            println!("📁 Download folder:    {}", config.download.root);
            Ok(())
        }
        Err(e) => {
            // Le download log garde tout ce qui a été traité; une prochaine
            // exécution reprendra où celle-ci s'est arrêtée
            error!("❌ Run aborted: {}", e);
            Err(e.into())
        }
    }
}
