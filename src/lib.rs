pub mod astrometry;
pub mod cli;
pub mod commands;
pub mod config;
pub mod fffile;
pub mod fits;
pub mod platepar;
pub mod wcs;

// Re-export commonly used items
pub use config::Config;
pub use platepar::Platepar;
pub use wcs::{fit_wcs, FittedWcs, Projection};
