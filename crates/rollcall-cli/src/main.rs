use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use rollcall_core::csv::{from_csv, report_file_name, to_csv};
use rollcall_core::records::{summarize, RecordQuery};
use rollcall_core::{
    AttendanceLog, CaptureAdapter, EnrollOutcome, EnrollmentStore, Frame, MarkOutcome, Signature,
    Storage,
};
use rollcall_station::{spawn_station, CommandAdapter, Config, Probe, StationHandle};
use rollcall_store::SqliteStore;
use std::path::{Path, PathBuf};

mod report;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance tracker")]
struct Cli {
    /// Database file (overrides config and ROLLCALL_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where the face comes from.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct Source {
    /// Image file, passed through the configured embedding command
    #[arg(long)]
    image: Option<PathBuf>,
    /// JSON signature (array of 128 numbers, or null) from an external model
    #[arg(long)]
    signature: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new face
    Enroll {
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Identifier (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        #[command(flatten)]
        source: Source,
    },
    /// Match a face and mark attendance for today
    Mark {
        #[command(flatten)]
        source: Source,
    },
    /// List enrolled identities
    Enrolled,
    /// Browse attendance records, newest first
    Records {
        /// Case-insensitive match on name or id
        #[arg(short, long)]
        search: Option<String>,
        /// Only this day (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show enrolled and attendance counts
    Summary {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Export attendance records as CSV
    Export {
        /// Output file, or "-" for stdout (default: attendance_report_<today>.csv)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Import attendance records from a CSV export
    Import {
        /// CSV file produced by `export`
        path: PathBuf,
    },
    /// Delete all enrollments and attendance records
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("loading configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    tracing::debug!(
        db = %config.db_path.display(),
        threshold = config.distance_threshold,
        embed = config.embed_command.is_some(),
        "configuration resolved"
    );

    match cli.command {
        Commands::Enroll { name, id, source } => {
            let station = start_station(&config)?;
            let outcome = station.enroll(id, name, probe(&source)?).await?;
            match outcome {
                EnrollOutcome::Enrolled(record) => {
                    println!("Enrolled {} (id {})", record.name, record.id);
                }
                EnrollOutcome::NoFaceDetected => {
                    println!("No face detected; make sure the face is clearly visible");
                }
            }
        }
        Commands::Mark { source } => {
            let station = start_station(&config)?;
            let outcome = station.mark(probe(&source)?).await?;
            print_outcome(&outcome);
        }
        Commands::Enrolled => {
            let store = open_store(&config.db_path)?;
            let identities = store.list_enrolled()?;
            if identities.is_empty() {
                println!("No faces enrolled");
            }
            for r in identities {
                println!("{}\t{}", r.id, r.name);
            }
        }
        Commands::Records { search, date, json } => {
            let store = open_store(&config.db_path)?;
            let entries = store.list_entries()?;
            let query = RecordQuery { search, date };
            let hits = query.apply(&entries);
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                print!("{}", report::table(&hits, entries.len()));
            }
        }
        Commands::Summary { json } => {
            let store = open_store(&config.db_path)?;
            let enrolled = store.list_enrolled()?.len();
            let summary = summarize(enrolled, &store.list_entries()?, Utc::now().date_naive());
            if json {
                println!("{}", serde_json::to_string(&summary)?);
                return Ok(());
            }
            println!("Enrolled:      {}", summary.enrolled);
            println!("Present today: {}", summary.present_today);
            println!("Total entries: {}", summary.total_entries);
        }
        Commands::Export { out } => {
            let store = open_store(&config.db_path)?;
            let Some(csv) = to_csv(&store.list_entries()?) else {
                println!("No attendance records to export");
                return Ok(());
            };
            let out = out.unwrap_or_else(|| PathBuf::from(report_file_name(Utc::now().date_naive())));
            if out.as_os_str() == "-" {
                println!("{csv}");
            } else {
                std::fs::write(&out, csv).with_context(|| format!("writing {}", out.display()))?;
                println!("Exported to {}", out.display());
            }
        }
        Commands::Import { path } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let entries = from_csv(&text).with_context(|| format!("parsing {}", path.display()))?;
            let mut store = open_store(&config.db_path)?;
            let (imported, skipped) = import_entries(&mut store, entries)?;
            println!("Imported {imported} entries ({skipped} already present)");
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("refusing to clear all enrollments and attendance without --yes");
            }
            let mut store = open_store(&config.db_path)?;
            store.clear_all()?;
            println!("All enrollments and attendance records deleted");
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    SqliteStore::open(path).with_context(|| format!("opening database {}", path.display()))
}

fn start_station(config: &Config) -> Result<StationHandle> {
    let store = open_store(&config.db_path)?;
    let adapter = match &config.embed_command {
        Some(argv) => Some(Box::new(CommandAdapter::new(argv)?) as Box<dyn CaptureAdapter>),
        None => None,
    };
    Ok(spawn_station(store, adapter, config.distance_threshold)?)
}

fn probe(source: &Source) -> Result<Probe> {
    if let Some(path) = &source.image {
        return Ok(Probe::Frame(Frame::open(path)?));
    }
    match &source.signature {
        Some(path) => Ok(Probe::Signature(read_signature(path)?)),
        None => bail!("either --image or --signature is required"),
    }
}

fn read_signature(path: &Path) -> Result<Option<Signature>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing signature {}", path.display()))
}

/// Append entries not already present for their `(id, date)`.
fn import_entries<S: AttendanceLog>(
    store: &mut S,
    entries: Vec<rollcall_core::AttendanceEntry>,
) -> Result<(usize, usize)> {
    let mut imported = 0;
    let mut skipped = 0;
    for entry in entries {
        match store.record_once(entry)? {
            None => imported += 1,
            Some(_) => skipped += 1,
        }
    }
    Ok((imported, skipped))
}

fn print_outcome(outcome: &MarkOutcome) {
    match outcome {
        MarkOutcome::Marked { entry, .. } => {
            println!("{outcome} at {}", entry.timestamp.format("%H:%M:%S UTC"));
        }
        MarkOutcome::NoMatch {
            best_distance: Some(d),
        } => {
            println!("{outcome} (closest distance {d:.3})");
        }
        _ => println!("{outcome}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_core::{AttendanceEntry, SIGNATURE_DIM};

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_source_is_exclusive() {
        let err = Cli::try_parse_from([
            "rollcall", "mark", "--image", "a.png", "--signature", "a.json",
        ]);
        assert!(err.is_err());
        assert!(Cli::try_parse_from(["rollcall", "mark"]).is_err());
        assert!(Cli::try_parse_from(["rollcall", "mark", "--signature", "a.json"]).is_ok());
    }

    #[test]
    fn test_records_date_flag() {
        let cli = Cli::try_parse_from(["rollcall", "records", "--date", "2025-03-04"]).unwrap();
        match cli.command {
            Commands::Records { date, .. } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 3, 4));
            }
            _ => panic!("expected records"),
        }
    }

    #[test]
    fn test_summary_json_flag() {
        let cli = Cli::try_parse_from(["rollcall", "summary", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Summary { json: true }));
        let cli = Cli::try_parse_from(["rollcall", "summary"]).unwrap();
        assert!(matches!(cli.command, Commands::Summary { json: false }));
    }

    #[test]
    fn test_read_signature_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sig.json");
        std::fs::write(&path, serde_json::to_string(&vec![0.5f32; SIGNATURE_DIM]).unwrap())
            .unwrap();
        assert!(read_signature(&path).unwrap().is_some());

        std::fs::write(&path, "null").unwrap();
        assert!(read_signature(&path).unwrap().is_none());

        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(read_signature(&path).is_err());
    }

    #[test]
    fn test_import_skips_existing() {
        let mut store = SqliteStore::in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap();
        store.append(AttendanceEntry::new("E1", "Alice", t0)).unwrap();

        let incoming = vec![
            AttendanceEntry::new("E1", "Alice", t0 + chrono::Duration::hours(1)),
            AttendanceEntry::new("E2", "Bob", t0),
        ];
        assert_eq!(import_entries(&mut store, incoming).unwrap(), (1, 1));
        assert_eq!(store.list_entries().unwrap().len(), 2);
    }

    #[test]
    fn test_export_import_round_trip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap();
        let mut source = open_store(&dir.path().join("nested/a.db")).unwrap();
        source.append(AttendanceEntry::new("E1", "Alice", t0)).unwrap();
        source
            .append(AttendanceEntry::new("E2", "Bob", t0 + chrono::Duration::seconds(90)))
            .unwrap();

        let csv = to_csv(&source.list_entries().unwrap()).unwrap();
        let mut target = SqliteStore::in_memory().unwrap();
        import_entries(&mut target, from_csv(&csv).unwrap()).unwrap();
        assert_eq!(target.list_entries().unwrap(), source.list_entries().unwrap());
    }
}
