use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tsdb_index::postings::expand_postings;
use tsdb_index::{ChunkMeta, IndexReader, Labels, MemPostings, Postings};

#[derive(Parser)]
#[command(name = "index-inspect", version, about = "Inspect a time-series index file")]
struct Cli {
    /// Path to the index file.
    index: PathBuf,
    /// Print JSON instead of plain text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Section offsets, format version and symbol count.
    Toc,
    /// Every symbol in order.
    Symbols {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Label names.
    Labels,
    /// Values of one label name.
    Values { name: String },
    /// Series references matching any of the given values of a label.
    Postings {
        name: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Labels and chunks of one series.
    Series { id: u64 },
    /// Top cardinality figures across all series.
    Stats {
        #[arg(long, default_value = "__name__")]
        label: String,
    },
}

#[derive(Serialize)]
struct TocReport<'a> {
    version: u8,
    size: usize,
    symbols: usize,
    symbol_table_size: usize,
    toc: &'a tsdb_index::Toc,
}

#[derive(Serialize)]
struct SeriesReport {
    id: u64,
    labels: Labels,
    chunks: Vec<ChunkMeta>,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let reader = IndexReader::open(&cli.index)
        .with_context(|| format!("open index {}", cli.index.display()))?;
    let mut out = io::BufWriter::new(io::stdout());

    match cli.command {
        Commands::Toc => {
            let report = TocReport {
                version: reader.version(),
                size: reader.size(),
                symbols: reader.symbols().count(),
                symbol_table_size: reader.symbol_table_size(),
                toc: reader.toc(),
            };
            if cli.json {
                serde_json::to_writer_pretty(&mut out, &report)?;
                writeln!(out)?;
            } else {
                let toc = report.toc;
                writeln!(out, "version:             {}", report.version)?;
                writeln!(out, "size:                {}", report.size)?;
                writeln!(out, "symbols:             {}", report.symbols)?;
                writeln!(out, "symbol table size:   {}", report.symbol_table_size)?;
                writeln!(out, "symbols offset:      {}", toc.symbols)?;
                writeln!(out, "series offset:       {}", toc.series)?;
                writeln!(out, "label indices:       {}", toc.label_indices)?;
                writeln!(out, "label indices table: {}", toc.label_indices_table)?;
                writeln!(out, "postings:            {}", toc.postings)?;
                writeln!(out, "postings table:      {}", toc.postings_table)?;
            }
        }
        Commands::Symbols { limit } => {
            let symbols = reader
                .symbols()
                .take(limit.unwrap_or(usize::MAX))
                .collect::<tsdb_index::Result<Vec<_>>>()?;
            print_list(&mut out, cli.json, &symbols)?;
        }
        Commands::Labels => {
            print_list(&mut out, cli.json, &reader.label_names())?;
        }
        Commands::Values { name } => {
            let values = reader.sorted_label_values(&name)?;
            print_list(&mut out, cli.json, &values)?;
        }
        Commands::Postings { name, values } => {
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            let mut p = reader.postings(&name, &values)?;
            let refs = expand_postings(&mut p)?;
            if cli.json {
                serde_json::to_writer(&mut out, &refs)?;
                writeln!(out)?;
            } else {
                for r in refs {
                    writeln!(out, "{r}")?;
                }
            }
        }
        Commands::Series { id } => {
            let mut labels = Labels::default();
            let mut chunks = Vec::new();
            reader
                .series(id, &mut labels, &mut chunks)
                .with_context(|| format!("read series {id}"))?;
            if cli.json {
                serde_json::to_writer_pretty(&mut out, &SeriesReport { id, labels, chunks })?;
                writeln!(out)?;
            } else {
                writeln!(out, "{labels}")?;
                for c in chunks {
                    writeln!(out, "  ref={} mint={} maxt={}", c.chunk_ref, c.min_time, c.max_time)?;
                }
            }
        }
        Commands::Stats { label } => {
            let mem = MemPostings::new_unordered();
            let mut all = reader.all_postings()?;
            let mut labels = Labels::default();
            let mut chunks = Vec::new();
            while all.next() {
                let id = all.at();
                reader.series(id, &mut labels, &mut chunks)?;
                mem.add(id, &labels);
            }
            if let Some(err) = all.err() {
                return Err(err.clone().into());
            }
            mem.ensure_order();

            let stats = mem.stats(&label);
            if cli.json {
                serde_json::to_writer_pretty(&mut out, &stats)?;
                writeln!(out)?;
            } else {
                writeln!(out, "label pairs: {}", stats.num_label_pairs)?;
                for (title, list) in [
                    ("highest cardinality metrics", &stats.cardinality_metrics_stats),
                    ("highest cardinality labels", &stats.cardinality_label_stats),
                    ("label names with most value bytes", &stats.label_value_stats),
                    ("most common label pairs", &stats.label_value_pairs_stats),
                ] {
                    writeln!(out, "{title}:")?;
                    for stat in list {
                        writeln!(out, "  {} {}", stat.count, stat.name)?;
                    }
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn print_list<W: Write>(out: &mut W, json: bool, items: &[&str]) -> Result<()> {
    if json {
        serde_json::to_writer(&mut *out, items)?;
        writeln!(out)?;
    } else {
        for item in items {
            writeln!(out, "{item}")?;
        }
    }
    Ok(())
}
