/// Where emulation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    Address(u64),
    Symbol(String),
    /// The entry recorded in the file header.
    Header,
}

impl Default for EntryPoint {
    fn default() -> Self {
        EntryPoint::Symbol(DEFAULT_ENTRY_SYMBOL.to_string())
    }
}

pub const DEFAULT_ENTRY_SYMBOL: &str = "main";
pub const DEFAULT_STACK_BASE: u64 = 0x7ff0_0000;
pub const DEFAULT_STACK_SIZE: u64 = 0x10000;
pub const DEFAULT_RETURN_ADDRESS: u64 = 0xffff_fff0;

/// Words between the top of the stack region and the initial frame.
pub const STACK_TOP_RESERVE: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub entry: EntryPoint,
    pub stack_base: u64,
    pub stack_size: u64,
    /// Pushed as the entry function's return address; reaching it halts.
    pub return_address: u64,
    pub max_steps: Option<u64>,
    pub argv: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry: EntryPoint::default(),
            stack_base: DEFAULT_STACK_BASE,
            stack_size: DEFAULT_STACK_SIZE,
            return_address: DEFAULT_RETURN_ADDRESS,
            max_steps: None,
            argv: Vec::new(),
        }
    }
}
