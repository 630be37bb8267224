use arzsync::io_stream::ArzReader;
use arzsync::manager::ArzManager;
use arzsync::source::file_time_to_unix_nanos;
use arzsync::{ArzError, RecordInfo};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arz", about = "Inspect and edit .arz game database archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields and table sizes
    Info {
        input: PathBuf,
    },
    /// List records with their index entries
    List {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the string pool with ids
    Strings {
        input: PathBuf,
    },
    /// Decode and print one record
    Dump {
        input:  PathBuf,
        record: String,
        #[arg(long)]
        json: bool,
    },
    /// Write every record as a text file under the output directory
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Drop records and rewrite the archive
    Remove {
        input: PathBuf,
        #[arg(required = true, num_args = 1..)]
        records: Vec<String>,
    },
}

#[derive(Serialize)]
struct ListEntry {
    name: String,
    #[serde(flatten)]
    info: RecordInfo,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let mut reader = ArzReader::open(&input)?;
            let h = reader.header()?;
            println!("── .arz Archive ─────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Magic          {:#x}", h.magic);
            println!("  Data blob      {} B", h.data_len());
            println!("  Record table   {} B at {}", h.record_table_size, h.record_table_start);
            println!("  String table   {} B at {}", h.string_table_size, h.string_table_start);
            println!("  Records        {}", h.record_count);
            println!("  Strings        {}", reader.string_count()?);
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let mut reader = ArzReader::open(&input)?;
            let entries = list_entries(&mut reader)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("{:<48} {:<24} {:>10} {:>10}  Modified", "Name", "Class", "Offset", "Compressed");
                for e in &entries {
                    println!("{:<48} {:<24} {:>10} {:>10}  {}",
                        e.name, e.info.class, e.info.offset, e.info.compressed_len,
                        format_time(e.info.timestamp));
                }
            }
        }

        // ── Strings ──────────────────────────────────────────────────────────
        Commands::Strings { input } => {
            let mut reader = ArzReader::open(&input)?;
            for (id, s) in reader.strings().enumerate() {
                println!("{id:>8}  {}", s?);
            }
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, record, json } => {
            let mut manager = open_existing(&input)?;
            let rec = manager.read_record(&record)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rec)?);
            } else {
                print!("{}", rec.to_dbr_text());
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir } => {
            let mut reader = ArzReader::open(&input)?;
            let mut written = 0usize;
            for (info, rec) in reader.records()? {
                let rec = match rec {
                    Ok(r) => r,
                    Err(e) => {
                        eprintln!("  skipped  name id {}: {e}", info.name_id);
                        continue;
                    }
                };
                if !is_relative_name(&rec.name) {
                    eprintln!("  skipped  {}: unsafe record name", rec.name);
                    continue;
                }
                let target = output_dir.join(&rec.name);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, rec.to_dbr_text())?;
                written += 1;
            }
            println!("Extracted {written} record(s) to: {}", output_dir.display());
        }

        // ── Remove ───────────────────────────────────────────────────────────
        Commands::Remove { input, records } => {
            let mut manager = open_existing(&input)?;
            for name in &records {
                if !manager.remove(name) {
                    eprintln!("  not found  {name}");
                }
            }
            manager.flush()?;
            println!("{} record(s) remain in {}", manager.len(), input.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// Open a manager without creating the archive when it is missing.
fn open_existing(path: &Path) -> Result<ArzManager, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(ArzError::NotFound(path.to_owned()).into());
    }
    let base = path.parent().unwrap_or(Path::new("."));
    Ok(ArzManager::open(path, base)?)
}

fn list_entries(reader: &mut ArzReader) -> Result<Vec<ListEntry>, Box<dyn std::error::Error>> {
    let infos = reader.record_infos().collect::<arzsync::Result<Vec<_>>>()?;
    let ids: Vec<u32> = infos.iter().map(|i| i.name_id).collect();
    let names = reader.resolve(&ids)?;
    Ok(names.into_iter().zip(infos).map(|(name, info)| ListEntry { name, info }).collect())
}

fn is_relative_name(name: &str) -> bool {
    let path = Path::new(name);
    path.components().next().is_some() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn format_time(ticks: i64) -> String {
    let nanos = file_time_to_unix_nanos(ticks);
    chrono::DateTime::from_timestamp(nanos.div_euclid(1_000_000_000), nanos.rem_euclid(1_000_000_000) as u32)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ticks.to_string())
}
