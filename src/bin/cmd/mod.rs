pub mod info;
pub mod run;

use banal::{Architecture, BinaryImage, Format, Result};
use log::{info, warn};

/// Open the image and settle on the architecture to emulate.
fn open_image(
    filepath: &str,
    format: Option<Format>,
    arch: Option<Architecture>,
) -> Result<(BinaryImage, Architecture)> {
    let image = BinaryImage::open(filepath, format)?;
    info!("format: {}", image.format());

    let detected = image.architecture();
    let arch = match (arch, detected) {
        (Some(forced), Ok(detected)) if forced != detected => {
            warn!("architecture forced to {forced}, image declares {detected}");
            forced
        }
        (Some(forced), _) => forced,
        (None, detected) => detected?,
    };
    info!("architecture: {arch}");
    Ok((image, arch))
}
