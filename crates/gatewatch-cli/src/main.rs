use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatewatch_core::Gallery;
use gatewatch_hw::{select, SelectionArgs, SourceOpener, SourceStrategy, V4l2Backend};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "gatewatch", version, about = "Gatewatch operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List local camera indices that open
    Cameras {
        /// Highest index (exclusive) to try
        #[arg(long, default_value_t = 8)]
        max: u32,
    },
    /// Run source selection once and print the status line
    Select {
        #[arg(long)]
        url: Option<String>,
        /// Preferred local camera index
        #[arg(long)]
        cam: Option<u32>,
        #[arg(long, default_value = "auto")]
        source: SourceStrategy,
    },
    /// Summarize the gallery
    Gallery {
        #[arg(long, default_value = "models/embeddings.json")]
        path: PathBuf,
    },
    /// Print the most recent event rows
    Events {
        #[arg(long, default_value = "data/logs/events.csv")]
        path: PathBuf,
        #[arg(short = 'n', default_value_t = 20)]
        count: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Cameras { max } => {
            let opener = SourceOpener::platform_default();
            let found = opener.list_local_indices(max);
            if found.is_empty() {
                println!("No cameras found");
            }
            for index in found {
                match V4l2Backend::describe(index) {
                    Some(info) => println!("{index}\t{}\t{} ({})", info.path, info.name, info.driver),
                    None => println!("{index}"),
                }
            }
        }
        Commands::Select { url, cam, source } => {
            let args = SelectionArgs {
                strategy: source,
                url,
                preferred_indices: cam.into_iter().collect(),
                ..SelectionArgs::default()
            };
            let opener = SourceOpener::platform_default();
            let selection = select(&opener, &args)?;
            let (width, height) = selection.source.size();
            println!(
                "{}",
                status_line(&selection.id.to_string(), selection.backend_name(), width, height)
            );
            selection.source.close();
        }
        Commands::Gallery { path } => {
            let gallery = Gallery::load(&path).with_context(|| format!("loading {}", path.display()))?;
            println!("embeddings: {}", gallery.len());
            println!("labels:     {}", gallery.labels().len());
            println!("dimension:  {}", gallery.dimension());
            for label in gallery.labels() {
                println!("  {label}");
            }
        }
        Commands::Events { path, count } => {
            let (header, rows) = tail_events(&path, count)?;
            write_events(std::io::stdout().lock(), &header, &rows)?;
        }
    }

    Ok(())
}

fn status_line(cam: &str, backend: &str, width: u32, height: u32) -> String {
    format!("cam={cam} backend={backend} size={width}x{height}")
}

/// Header plus the last `count` records of an event log.
fn tail_events(path: &Path, count: usize) -> Result<(csv::StringRecord, Vec<csv::StringRecord>)> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening event log {}", path.display()))?;
    let header = reader.headers()?.clone();
    if count == 0 {
        return Ok((header, Vec::new()));
    }
    let mut rows = VecDeque::with_capacity(count);
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        if rows.len() == count {
            rows.pop_front();
        }
        rows.push_back(record);
    }
    Ok((header, rows.into()))
}

/// Re-emit rows as CSV so quoted fields survive.
fn write_events<W: std::io::Write>(out: W, header: &csv::StringRecord, rows: &[csv::StringRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}
