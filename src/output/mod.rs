mod progress;
mod styling;
mod summary;
mod tables;

pub use progress::Spinner;
pub use styling::{dim, magenta_bold};
pub use summary::{render_summary, BuildReport};

/// Prints the tool name and version to stderr.
pub fn print_banner() {
    eprintln!(
        "{} {}\n",
        magenta_bold("buildkite"),
        dim(env!("CARGO_PKG_VERSION"))
    );
}
