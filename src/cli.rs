use clap::Parser;

use crate::wcs::Projection;

#[derive(Parser)]
#[command(name = "ff-annotate")]
#[command(about = "Add FITS metadata and WCS to FF files produced by a meteor camera", long_about = None)]
pub struct Cli {
    /// Path to the folder with FF files
    pub dir_path: String,

    /// Polynomial order of the WCS fit
    #[arg(long, default_value = "5")]
    pub order: usize,

    /// Sky projection family (zea, tan)
    #[arg(long, default_value = "zea")]
    pub projection: Projection,

    /// Compute everything but do not rewrite any file
    #[arg(long)]
    pub dry_run: bool,
}
