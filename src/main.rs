use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use chordgrid::store::TUNEBOOK_FILE_KEY;
use chordgrid::{
    read_tunebook_file_with_report, spawn_merge, write_tunebook_file, Config, KeyValueStore,
    MergePhase, ParseReport, Rhythm, RhythmRegistry, Tunebook, YamlFileStore,
};

const DEFAULT_CONFIG: &str = "chordgrid.yaml";

/// chordgrid - chord grid tunebook tool
#[derive(Parser, Debug)]
#[command(name = "chordgrid", about = "Read, convert and merge chord grid tunebooks")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a tunebook and report what was skipped
    Check {
        /// Tunebook file (text or XML); defaults to the last checked file
        file: Option<PathBuf>,
    },

    /// Re-write a tunebook in the format implied by the output extension
    Convert { input: PathBuf, output: PathBuf },

    /// Merge the source tunebook into the target tunebook
    Merge {
        target: PathBuf,
        source: PathBuf,

        /// Where to write the result (default: overwrite the target)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage the known rhythms
    Rhythms {
        #[command(subcommand)]
        action: RhythmsCommand,
    },

    /// Print one tune in text form
    Show { file: PathBuf, tune_id: String },
}

#[derive(Subcommand, Debug)]
enum RhythmsCommand {
    List,
    Add {
        name: String,
        /// Time signature, e.g. 6/8 or C
        signature: String,
        beats_per_bar: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    init_logging(cli.debug, &config.log_level);
    debug!("Using store {:?}", config.store);

    let mut store = config.open_store()?;
    let mut registry = config.load_registry(&store)?;

    match cli.command {
        Command::Check { file } => {
            let file = match file {
                Some(file) => file,
                None => store
                    .get(TUNEBOOK_FILE_KEY)?
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow!("No tunebook file given and none checked before"))?,
            };
            let (book, report) = load(&file, &registry)?;
            print_book(&book);
            print_report(&report);
            store.set(TUNEBOOK_FILE_KEY, &file.to_string_lossy())?;
        }
        Command::Convert { input, output } => {
            let (book, report) = load(&input, &registry)?;
            print_report(&report);
            write_tunebook_file(&book, &output)
                .with_context(|| format!("Failed to write {:?}", output))?;
            println!(
                "Wrote {} tunes and {} sets to {}",
                book.count_tunes(),
                book.count_sets(),
                output.display()
            );
        }
        Command::Merge {
            target,
            source,
            output,
        } => {
            let (target_book, _) = load(&target, &registry)?;
            let (source_book, report) = load(&source, &registry)?;
            print_report(&report);

            let handle = spawn_merge(target_book, source_book);
            let (merged, summary) = handle.wait_with_progress(|p| {
                if p.done == p.total {
                    eprintln!("{}: {}/{}", p.phase, p.done, p.total);
                } else if p.done == 0 && p.phase == MergePhase::Tunes {
                    eprintln!("{} ...", p.phase);
                }
            })?;

            for (from, to) in &summary.renamed {
                println!("Renamed {} -> {}", from, to);
            }
            println!(
                "{} tunes added, {} already present, {} sets added",
                summary.tunes_added, summary.tunes_skipped, summary.sets_added
            );

            let output = output.unwrap_or(target);
            write_tunebook_file(&merged, &output)
                .with_context(|| format!("Failed to write {:?}", output))?;
            info!("Merged tunebook written to {:?}", output);
        }
        Command::Rhythms { action } => match action {
            RhythmsCommand::List => {
                for rhythm in registry.iter() {
                    println!("{}", rhythm);
                }
            }
            RhythmsCommand::Add {
                name,
                signature,
                beats_per_bar,
            } => {
                let rhythm = Rhythm::new(&name, &signature, beats_per_bar)?;
                println!("Added {}", rhythm);
                registry.add(rhythm);
                save_rhythms(&registry, &mut store)?;
            }
        },
        Command::Show { file, tune_id } => {
            let (book, _) = load(&file, &registry)?;
            let tune = book
                .get_tune_from_id(&tune_id)
                .ok_or_else(|| anyhow!("No tune with id '{}' in {}", tune_id, file.display()))?;
            print!("{}", tune);
        }
    }

    Ok(())
}

fn init_logging(debug: bool, configured: &str) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn load(path: &Path, registry: &RhythmRegistry) -> Result<(Tunebook, ParseReport)> {
    read_tunebook_file_with_report(path, registry)
        .with_context(|| format!("Failed to read tunebook {:?}", path))
}

fn save_rhythms(registry: &RhythmRegistry, store: &mut YamlFileStore) -> Result<()> {
    let path = store.path().to_path_buf();
    registry
        .save(store)
        .with_context(|| format!("Failed to save rhythms to {:?}", path))
}

fn print_book(book: &Tunebook) {
    println!("{} tunes, {} sets", book.count_tunes(), book.count_sets());
    for tune in book.tunes_by_index() {
        println!(
            "  X:{:<4} {:<24} {} ({}, {})",
            tune.index(),
            tune.id(),
            tune.title(),
            tune.rhythm().name(),
            tune.key()
        );
    }
    for set in book.sets() {
        println!("  SET {:<22} {}", set.name(), set.title(book));
    }
}

fn print_report(report: &ParseReport) {
    for skipped in &report.skipped {
        println!("Skipped {:?} #{}: {}", skipped.kind, skipped.ordinal, skipped.error);
    }
    for unresolved in &report.unresolved {
        println!(
            "Set '{}': unknown tune '{}' dropped",
            unresolved.set, unresolved.reference
        );
    }
}
