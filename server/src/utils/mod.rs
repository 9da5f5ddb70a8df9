pub mod filename;

pub use filename::sanitize_filename;
