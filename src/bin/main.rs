mod cmd;

use clap::{Parser, Subcommand};
use log::{LevelFilter, error};

#[derive(Parser)]
#[command(name = "banal", about = "Load an executable into an emulator and trace it")]
struct Cli {
    /// More output per occurrence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emulate an executable from its entry function
    Run(cmd::run::Cmd),
    /// Describe the segments, sections and properties of an executable
    Info(cmd::info::Cmd),
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(err) = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    ) {
        eprintln!("unable to initialize logging: {err}");
    }

    let result = match &cli.command {
        Commands::Run(cmd) => cmd.execute(),
        Commands::Info(cmd) => cmd.execute(),
    };
    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }
}
