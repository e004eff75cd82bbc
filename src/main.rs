use clap::{Parser, Subcommand};
use log::{error, info, warn};
use movie_admin::modules::catalog::CatalogConfig;
use movie_admin::modules::navigation::LogNavigator;
use movie_admin::modules::provider::{DEFAULT_PROVIDER_URL, ProviderConfig};
use movie_admin::modules::serialize::{
    AdminConfig, build_coordinator, load_config, resolve_credential, save_config,
};
use movie_admin::{Record, RecordField, Session};
use simplelog::*;
use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;

#[derive(Parser)]
#[command(
    name = "movie-admin",
    version,
    about = "Add movies from OMDb to the catalog",
    long_about = include_str!("../help.txt")
)]
struct Cli {
    #[arg(short = 'l', long = "log-file", default_value = "movie-admin.log")]
    log_file: String,

    #[arg(short = 'c', long = "config", default_value = "./movie-admin.toml")]
    config: String,

    /// Catalog token, overrides MOVIE_ADMIN_TOKEN and the config file
    #[arg(short = 't', long = "token")]
    token: Option<String>,

    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config file
    Init {
        #[arg(long = "api-key")]
        api_key: String,
        #[arg(long = "catalog-url")]
        catalog_url: String,
        #[arg(long = "provider-url", default_value = DEFAULT_PROVIDER_URL)]
        provider_url: String,
        #[arg(long)]
        force: bool,
    },
    /// List provider matches for a title or imdbID
    Search { query: String },
    /// Load one match and check it against the catalog
    Show {
        query: String,
        #[arg(short = 'p', long = "pick")]
        pick: Option<usize>,
    },
    /// Load one match, set its download links and publish it
    Add {
        query: String,
        #[arg(short = 'p', long = "pick")]
        pick: Option<usize>,
        #[arg(long = "low-url")]
        low_url: Option<String>,
        #[arg(long = "hd-url")]
        hd_url: Option<String>,
        #[arg(long = "full-hd-url")]
        full_hd_url: Option<String>,
        #[arg(long = "qhd-url")]
        qhd_url: Option<String>,
    },
}

fn init_logger(log_path: &str, verbose: bool) -> Result<(), Box<dyn Error>> {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    WriteLogger::init(
        level,
        ConfigBuilder::new()
            .set_time_format_rfc3339()
            .build(),
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?,
    )?;
    Ok(())
}

fn print_record(record: &Record) {
    for field in RecordField::ALL {
        if let Some(value) = record.get(field) {
            println!("{:>12}: {value}", field.label());
        }
    }
}

fn print_session(session: &Session) {
    match &session.record {
        Some(record) => print_record(record),
        None => println!("No movie loaded"),
    }
    if session.exists {
        println!("The movie is existing");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_file, cli.verbose)?;

    if let Command::Init { api_key, catalog_url, provider_url, force } = &cli.command {
        if Path::new(&cli.config).exists() && !force {
            return Err(format!("{} exists, pass --force to overwrite", cli.config).into());
        }
        let config = AdminConfig::new(
            ProviderConfig::new(provider_url, api_key),
            CatalogConfig::new(catalog_url),
        );
        save_config(&cli.config, &config)?;
        info!("Wrote {}", cli.config);
        println!("Wrote {}", cli.config);
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let credential = resolve_credential(&config, cli.token.clone());
    if !credential.is_present() {
        warn!("No catalog token configured, catalog requests will be anonymous");
    }
    let coordinator = build_coordinator(&config, credential, LogNavigator)?;

    match cli.command {
        Command::Init { .. } => {}
        Command::Search { query } => {
            let candidates = coordinator.search(&query).await?;
            if candidates.is_empty() {
                println!("Movie not found");
            }
            for (i, candidate) in candidates.iter().enumerate() {
                println!("{i:>3}  {candidate}");
            }
        }
        Command::Show { query, pick } => {
            let session = coordinator.lookup(&query, pick).await?;
            print_session(&session);
        }
        Command::Add { query, pick, low_url, hd_url, full_hd_url, qhd_url } => {
            let session = coordinator.lookup(&query, pick).await?;
            if session.exists {
                print_session(&session);
                return Err("movie is already in the catalog".into());
            }

            let links = [
                (RecordField::LowUrl, low_url),
                (RecordField::HdUrl, hd_url),
                (RecordField::FullHdUrl, full_hd_url),
                (RecordField::QhdUrl, qhd_url),
            ];
            for (field, value) in links {
                if let Some(value) = value {
                    coordinator.edit_field(field, value)?;
                }
            }

            match coordinator.submit().await {
                Ok(confirmation) => {
                    print_session(&coordinator.snapshot());
                    println!("Published: {confirmation}");
                }
                Err(e) => {
                    error!("Publish failed: {e}");
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
