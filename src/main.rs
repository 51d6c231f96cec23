use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use apk_triage::inference::{analyze_batch_with_artifacts, AnalysisRecord};
use apk_triage::train::{train_and_save, train_merged_and_save, TrainingInputs, TrainingReport};
use apk_triage::{extract_static_features, Config, FeatureVocabulary};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; missing fields take their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the model, imputer, scaler and feature names
    #[arg(short, long, global = true)]
    artifacts: Option<PathBuf>,

    /// -v for info, -vv for debug. RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit the classifier from feature tables and write the artifacts
    Train {
        /// Static manifest feature table
        #[arg(long = "static")]
        static_features: Option<PathBuf>,

        /// Syscall frequency table
        #[arg(long)]
        syscalls: Option<PathBuf>,

        /// Syscall and binder frequency table (supplies the labels)
        #[arg(long)]
        binders: Option<PathBuf>,

        /// Single pre-merged table instead of the three above
        #[arg(long)]
        merged: Option<PathBuf>,

        /// Print the training report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify one or more APKs with the trained artifacts
    Analyze {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Fail on feature width mismatch instead of padding/truncating
        #[arg(long)]
        strict_width: bool,
    },
    /// Print the persisted feature names, or those an APK sets
    Vocabulary {
        #[arg(long)]
        apk: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = Config::load_or_default(args.config.as_deref())?;
    if let Some(dir) = args.artifacts {
        config.artifacts.dir = dir;
    }

    match args.command {
        Command::Train {
            static_features,
            syscalls,
            binders,
            merged,
            json,
        } => {
            let report = match (merged, static_features, syscalls, binders) {
                (Some(merged), None, None, None) => train_merged_and_save(&merged, &config)
                    .with_context(|| format!("training on {} failed", merged.display()))?,
                (None, Some(static_features), Some(syscalls), Some(syscall_binders)) => {
                    let inputs = TrainingInputs {
                        static_features,
                        syscalls,
                        syscall_binders,
                    };
                    train_and_save(&inputs, &config).context("training failed")?
                }
                _ => bail!("pass either --merged, or all of --static, --syscalls and --binders"),
            };
            print_report(&report, json)?;
            eprintln!("Artifacts written to {}", config.artifacts.dir.display());
        }
        Command::Analyze {
            paths,
            format,
            strict_width,
        } => {
            config.strict_width |= strict_width;
            let records = analyze_batch_with_artifacts(&paths, &config);
            print_records(&records, format)?;
            if records.iter().all(|record| record.result.is_none()) {
                bail!("none of the {} APKs produced a result", records.len());
            }
        }
        Command::Vocabulary { apk } => {
            let path = config.artifacts.vocabulary_path();
            let vocabulary = FeatureVocabulary::load(&path)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            match apk {
                None => {
                    for (index, name) in vocabulary.names().iter().enumerate() {
                        writeln!(out, "{index}\t{name}")?;
                    }
                }
                Some(apk) => {
                    let attributes = extract_static_features(&apk)?;
                    let hits: Vec<&String> = vocabulary
                        .names()
                        .iter()
                        .filter(|name| attributes.contains(*name))
                        .collect();
                    for name in &hits {
                        writeln!(out, "{name}")?;
                    }
                    eprintln!(
                        "{} of {} extracted attributes are in the {}-name vocabulary",
                        hits.len(),
                        attributes.len(),
                        vocabulary.len()
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_report(report: &TrainingReport, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        serde_json::to_writer_pretty(&mut out, report)?;
        writeln!(out)?;
    } else {
        write!(out, "{report}")?;
    }
    Ok(())
}

fn print_records(records: &[AnalysisRecord], format: OutputFormat) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in records {
        match format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut out, record)?;
                writeln!(out)?;
            }
            OutputFormat::Text => match (&record.result, &record.error) {
                (Some(result), _) => {
                    writeln!(out, "{}", record.path.display())?;
                    writeln!(
                        out,
                        "  Category:   {} ({:.2}%)",
                        result.prediction,
                        result.confidence * 100.0
                    )?;
                    writeln!(
                        out,
                        "  Verdict:    {}",
                        if result.prediction.is_malicious() {
                            "malicious"
                        } else {
                            "not malicious"
                        }
                    )?;
                    writeln!(out, "  SHA-256:    {}", result.sha256)?;
                    writeln!(out, "  Probabilities:")?;
                    for (class, p) in &result.probabilities {
                        writeln!(out, "    {:<14} {:>7.2}%", class, p * 100.0)?;
                    }
                }
                (None, error) => {
                    writeln!(
                        out,
                        "{}: no result ({})",
                        record.path.display(),
                        error.as_deref().unwrap_or("unknown error")
                    )?;
                }
            },
        }
    }
    Ok(())
}
