//! CLI for tagstream — summarize and inspect TCSPC record files.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tagstream")]
#[command(about = "tagstream — TCSPC event stream processing")]
#[command(version = tagstream_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Raw record file format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Becker & Hickl SPC FIFO (most models)
    BhSpc,
    /// Becker & Hickl SPC FIFO with SPC-180 fast intensity counter
    BhSpcIntensity,
    /// Becker & Hickl SPC-600/630, 4096-channel mode (48-bit records)
    BhSpc600_4096,
    /// Becker & Hickl SPC-600/630, 256-channel mode
    BhSpc600_256,
    /// PicoQuant PicoHarp 300 T2
    PqT2Picoharp,
    /// PicoQuant HydraHarp V1 T2
    PqT2Hydrav1,
    /// PicoQuant generic (HydraHarp V2 / MultiHarp / TimeHarp 260) T2
    PqT2Generic,
    /// PicoQuant PicoHarp 300 T3
    PqT3Picoharp,
    /// PicoQuant HydraHarp V1 T3
    PqT3Hydrav1,
    /// PicoQuant generic (HydraHarp V2 / MultiHarp / TimeHarp 260) T3
    PqT3Generic,
    /// Swabian Time Tagger 16-byte tags
    Swabian,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a record file and print per-channel event counts
    Summarize {
        /// Input file
        file: String,

        /// Record format of the input file
        #[arg(long, value_enum)]
        format: Format,

        /// Byte offset at which records begin (e.g. 4 for .spc headers)
        #[arg(long, default_value = "0")]
        start_offset: u64,

        /// Stop with an error on the first in-band warning
        #[arg(long)]
        strict: bool,
    },

    /// Print a representative processing graph
    Graph {
        /// Emit JSON instead of Graphviz dot
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Summarize {
            file,
            format,
            start_offset,
            strict,
        } => commands::summarize(&file, format, start_offset, strict),
        Commands::Graph { json } => commands::graph(json),
    };

    if let Err(error) = result {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
