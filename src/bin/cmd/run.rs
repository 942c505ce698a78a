use banal::engine::DEFAULT_ENTRY_SYMBOL;
use banal::{Analysis, Architecture, EngineConfig, EntryPoint, Format, Outcome, Result};
use clap::Args;
use log::{info, warn};

#[derive(Args)]
pub struct Cmd {
    #[arg(short, long)]
    pub filepath: String,

    /// Force the binary format instead of detecting it
    #[arg(long)]
    pub format: Option<Format>,

    /// Emulate as this architecture instead of the one in the header
    #[arg(long)]
    pub arch: Option<Architecture>,

    /// Start at this address (hex) instead of a symbol
    #[arg(long, value_parser = parse_address, conflicts_with_all = ["entry_symbol", "header_entry"])]
    pub entry: Option<u64>,

    #[arg(long, default_value = DEFAULT_ENTRY_SYMBOL)]
    pub entry_symbol: String,

    /// Start at the entry point recorded in the header
    #[arg(long, conflicts_with = "entry_symbol")]
    pub header_entry: bool,

    /// Stack region base (hex)
    #[arg(long, value_parser = parse_address)]
    pub stack_base: Option<u64>,

    /// Stack region size (hex)
    #[arg(long, value_parser = parse_address)]
    pub stack_size: Option<u64>,

    /// Stop after this many instructions
    #[arg(long)]
    pub max_steps: Option<u64>,

    /// Arguments passed to the emulated function
    #[arg(last = true)]
    pub args: Vec<String>,
}

fn parse_address(s: &str) -> std::result::Result<u64, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid address {s:?}: {e}"))
}

impl Cmd {
    pub fn execute(&self) -> Result<()> {
        let (mut image, arch) = super::open_image(&self.filepath, self.format, self.arch)?;

        let entry = match self.entry {
            Some(address) => EntryPoint::Address(address),
            None if self.header_entry => EntryPoint::Header,
            None => EntryPoint::Symbol(self.entry_symbol.clone()),
        };
        let mut argv = vec![self.filepath.clone()];
        argv.extend(self.args.iter().cloned());
        info!("argc: {}", argv.len());

        let mut config = EngineConfig {
            entry,
            max_steps: self.max_steps,
            argv,
            ..EngineConfig::default()
        };
        if let Some(base) = self.stack_base {
            config.stack_base = base;
        }
        if let Some(size) = self.stack_size {
            config.stack_size = size;
        }

        let mut analysis = Analysis::new(arch)?;
        let report = analysis.start(&mut image, config, |engine| {
            engine.add_instruction_hook(|insn| {
                info!("[{:#x}]> {insn}", insn.address);
            });
        })?;

        match report.outcome {
            Outcome::Halted(reason) => {
                info!("halted after {} instruction(s): {reason:?}", report.steps)
            }
            Outcome::Faulted(cause) => {
                warn!("faulted after {} instruction(s): {cause}", report.steps)
            }
        }
        Ok(())
    }
}
