use banal::{Architecture, Format, Result};
use clap::Args;

#[derive(Args)]
pub struct Cmd {
    #[arg(short, long)]
    pub filepath: String,

    /// Force the binary format instead of detecting it
    #[arg(long)]
    pub format: Option<Format>,

    #[arg(long)]
    pub arch: Option<Architecture>,
}

impl Cmd {
    pub fn execute(&self) -> Result<()> {
        let (image, _) = super::open_image(&self.filepath, self.format, self.arch)?;
        image.dump();
        Ok(())
    }
}
