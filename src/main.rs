// passtrail: travel history from passport stamp scans and flight confirmation emails

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::error;

use passtrail::models::{EmailMessage, RawDocument, TravelCandidate};
use passtrail::processing::TextRecognizer;
use passtrail::storage::{mime_type_for_path, JsonFileEntryStore};
use passtrail::{EvidencePipeline, PipelineConfig, ProcessingReport, TravelError};

#[derive(Parser)]
#[command(name = "passtrail")]
#[command(about = "Reconstruct travel history from passport stamps and flight emails")]
#[command(version)]
struct Cli {
    /// JSON configuration file (defaults plus environment overrides when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding one JSON file of travel entries per user
    #[arg(long, global = true, default_value = "passtrail-data")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract stamp candidates from scanned passport pages
    Scan {
        /// Image files (JPEG, PNG or TIFF)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Language hint passed to the recognition backends
        #[arg(long)]
        language: Option<String>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse a JSON array of email messages into flight candidates
    Emails {
        file: PathBuf,
    },

    /// Merge a JSON array of candidates into a user's stored history
    Reconcile {
        #[arg(long)]
        user: String,

        file: PathBuf,
    },

    /// Print a user's travel history and summary
    Summary {
        #[arg(long)]
        user: String,

        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,

        /// Only entries the user has verified
        #[arg(long)]
        verified_only: bool,
    },

    /// Mark a stored entry as reviewed
    Verify {
        #[arg(long)]
        user: String,

        #[arg(long)]
        entry: String,

        /// Record the entry as wrong instead of confirmed
        #[arg(long)]
        reject: bool,

        #[arg(long)]
        notes: Option<String>,
    },
}

fn build_pipeline(cli: &Cli, language: Option<String>) -> Result<EvidencePipeline, TravelError> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    config.validate()?;
    let store = JsonFileEntryStore::open(&cli.store)?;
    let recognizer = TextRecognizer::from_config(&config)?.with_hint(language);
    Ok(EvidencePipeline::new(&config, recognizer, Box::new(store)))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, TravelError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), TravelError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_scan_report(path: &Path, report: &ProcessingReport) {
    println!("{}: {} region(s)", path.display(), report.regions);
    for stamp in &report.accepted {
        println!(
            "  ACCEPTED {:?} country={} city={} entry={} exit={} airport={} confidence={:.2}",
            stamp.stamp_type,
            stamp.country.as_deref().unwrap_or("-"),
            stamp.city.as_deref().unwrap_or("-"),
            stamp.entry_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
            stamp.exit_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
            stamp.airport_code.as_deref().unwrap_or("-"),
            stamp.confidence
        );
    }
    for rejected in &report.rejected {
        for issue in &rejected.issues {
            println!("  REJECTED [{:?}] {}", issue.issue_type, issue.message);
        }
    }
}

fn run(cli: &Cli) -> Result<(), TravelError> {
    match &cli.command {
        Commands::Scan { files, language, json } => {
            let pipeline = build_pipeline(cli, language.clone())?;
            let mut reports = Vec::new();
            for path in files {
                let document = RawDocument::new(fs::read(path)?, mime_type_for_path(path));
                let report = pipeline.process_document_report(&document)?;
                if !json {
                    print_scan_report(path, &report);
                }
                reports.push(report);
            }
            if *json {
                print_json(&reports)?;
            }
        }
        Commands::Emails { file } => {
            let pipeline = build_pipeline(cli, None)?;
            let emails: Vec<EmailMessage> = read_json(file)?;
            let candidates: Vec<TravelCandidate> = emails
                .iter()
                .filter_map(|email| pipeline.process_email(email))
                .map(TravelCandidate::Flight)
                .collect();
            print_json(&candidates)?;
        }
        Commands::Reconcile { user, file } => {
            let pipeline = build_pipeline(cli, None)?;
            let candidates: Vec<TravelCandidate> = read_json(file)?;
            print_json(&pipeline.reconcile(user, candidates)?)?;
        }
        Commands::Summary {
            user,
            from,
            to,
            verified_only,
        } => {
            let pipeline = build_pipeline(cli, None)?;
            for entry in pipeline.history(user, *from, *to, !verified_only)? {
                println!(
                    "{} .. {}  {:<20} {:<16} {:<14} {:>3}  {}",
                    entry.departure_date,
                    entry.return_date,
                    entry.destination_country,
                    entry.destination_city.as_deref().unwrap_or("-"),
                    entry.source_type.as_str(),
                    entry.confidence_score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                    if entry.is_verified { "verified" } else { "unverified" }
                );
            }
            print_json(&pipeline.summary(user)?)?;
        }
        Commands::Verify {
            user,
            entry,
            reject,
            notes,
        } => {
            let pipeline = build_pipeline(cli, None)?;
            print_json(&pipeline.verify_entry(user, entry, !reject, notes.clone())?)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            eprintln!("Error: {}", err);
            if err.is_retryable() {
                ExitCode::from(75)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
