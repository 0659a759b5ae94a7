pub mod annotate;

pub use annotate::{annotate_directory, annotate_file, AnnotateOptions};
