use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dirsite::config::Config;
use dirsite::render::Site;
use dirsite::{export, server};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dirsite")]
#[command(version)]
#[command(about = "Serve or export a site whose routes are its source directory")]
#[command(long_about = "\
Serve or export a site whose routes are its source directory

Every file under the source directory is a route. Files with a template
extension are rendered through Tera; everything else is served as-is.

  src/
  ├── index.html                 # /  and  /fr/
  ├── style.css                  # /style.css (static)
  └── posts/
      ├── [slug].html            # /posts/<anything>.html, path_params.slug
      └── _data/                 # one entry per exported slug
          ├── alice.md
          └── bob.md
  lang/
  ├── en.json                    # default language, backfilled on lookup
  └── fr.json                    # /fr/... renders with these strings")]
struct Cli {
    /// Default language code
    #[arg(long, env = "DIRSITE_DEFAULT_LANG", default_value = "en", global = true)]
    default_lang: String,

    /// Source directory
    #[arg(long, env = "DIRSITE_DIR", default_value = "src", global = true)]
    dir: PathBuf,

    /// Export output directory
    #[arg(long, env = "DIRSITE_OUT", default_value = "docs", global = true)]
    out: PathBuf,

    /// Language file directory
    #[arg(long, env = "DIRSITE_LANG_DIR", default_value = "lang", global = true)]
    lang_dir: PathBuf,

    /// Comma-separated template extensions
    #[arg(long, env = "DIRSITE_EXT", default_value = "html", global = true)]
    ext: String,

    /// Do not add missing keys to language files
    #[arg(long, env = "DIRSITE_DISABLE_LANG_AUTO_SYNC", global = true)]
    disable_lang_auto_sync: bool,

    /// Fail on unreadable language files and stop re-reading them per request
    #[arg(long, env = "DIRSITE_STRICT_LANG", global = true)]
    strict_lang: bool,

    /// Address to listen on
    #[arg(long, env = "DIRSITE_HOST", default_value = "127.0.0.1", global = true)]
    host: String,

    /// Port to listen on
    #[arg(long, env = "DIRSITE_PORT", default_value_t = 8080, global = true)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Serve the site (default)
    Run,
    /// Render every route into the output directory
    Export,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            source_dir: self.dir.clone(),
            out_dir: self.out.clone(),
            lang_dir: self.lang_dir.clone(),
            template_exts: Config::parse_extensions(&self.ext),
            default_lang: self.default_lang.clone(),
            lang_auto_sync: !self.disable_lang_auto_sync,
            strict_lang: self.strict_lang,
            host: self.host.clone(),
            port: self.port,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dirsite=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    config.validate()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Export => {
            let summary = export::export(&config).await?;
            info!("Wrote {} file(s)", summary.files_written);
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let site = Arc::new(Site::open(config)?);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("running on http://{}", listener.local_addr()?);

    server::serve(listener, site, shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
