use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use audio_analysis_worker::result_store::{AudioRecord, ResultStore, SqliteResultStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

/// Inspects and seeds the audio records the worker analyzes.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite results database file.
    #[clap(value_parser = parse_path)]
    pub db_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Imports records from a JSON file containing an array of audio records.
    /// Existing records with the same id are replaced.
    Import {
        #[clap(value_parser = parse_path)]
        file: PathBuf,
    },

    /// Prints a record, including its detections, as JSON.
    Show { audio_id: String },

    /// Prints the cached analysis result for a record.
    ShowResult { analysis_id: String, audio_id: String },
}

fn import(store: &SqliteResultStore, file: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {:?}", file))?;
    let records: Vec<AudioRecord> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse records from {:?}", file))?;

    for record in &records {
        store.put_audio_record(record)?;
    }
    println!("Imported {} records", records.len());
    Ok(())
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    let store = SqliteResultStore::new(&cli_args.db_path)?;

    match cli_args.command {
        Command::Import { file } => import(&store, &file),
        Command::Show { audio_id } => match store.get_audio_record(&audio_id)? {
            Some(record) => {
                println!("{}", serde_json::to_string_pretty(&record)?);
                Ok(())
            }
            None => bail!("Audio record {} not found", audio_id),
        },
        Command::ShowResult {
            analysis_id,
            audio_id,
        } => match store.get_cached_analysis_result(&analysis_id, &audio_id)? {
            Some(result) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(())
            }
            None => bail!("No cached {} result for {}", analysis_id, audio_id),
        },
    }
}
