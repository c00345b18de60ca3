mod commands;

use clap::{Parser, Subcommand};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::io::{self, Write};

use commands::{cell_flu, combine_iscell, downsample, figures, frame_flu, mask_stack, response, sta_movie, top_cells};

#[derive(Parser)]
#[command(
    name = "calcium",
    about = "Two-photon calcium imaging helpers: STA movies, s2p mask stacks, response statistics, QA figures"
)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stimulus-triggered dF/F movie per recording
    StaMovie(sta_movie::StaMovieArgs),
    /// Mean raw cell fluorescence across each session
    CellFlu(cell_flu::CellFluArgs),
    /// Mean frame intensity drift from downsampled images
    FrameFlu(frame_flu::FrameFluArgs),
    /// Mean of the first and last 1000 frames of each recording
    Downsample(downsample::DownsampleArgs),
    /// ImageJ stack of Suite2p masks, STA images and SLM targets
    MaskStack(mask_stack::MaskStackArgs),
    /// Add the cells flagged in another iscell.npy (backs up the original)
    CombineIscell(combine_iscell::CombineIscellArgs),
    /// Cells with the largest post-stimulus STA
    TopCells(top_cells::TopCellsArgs),
    /// STA traces, positions and postage stamps of the top cells
    Figures(figures::FiguresArgs),
    /// Response frequency per trial and per cell
    Response(response::ResponseArgs),
}

fn progress(prog: f64, msg: &str) {
    let _ = writeln!(
        io::stderr(),
        "{}",
        serde_json::json!({"progress": prog, "message": msg})
    );
    let _ = io::stderr().flush();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)?;

    match cli.command {
        Commands::StaMovie(args) => sta_movie::run(args, progress)?,
        Commands::CellFlu(args) => cell_flu::run(args, progress)?,
        Commands::FrameFlu(args) => frame_flu::run(args, progress)?,
        Commands::Downsample(args) => downsample::run(args, progress)?,
        Commands::MaskStack(args) => mask_stack::run(args, progress)?,
        Commands::CombineIscell(args) => combine_iscell::run(args, progress)?,
        Commands::TopCells(args) => top_cells::run(args, progress)?,
        Commands::Figures(args) => figures::run(args, progress)?,
        Commands::Response(args) => response::run(args, progress)?,
    }
    Ok(())
}
