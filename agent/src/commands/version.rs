//! Version command

/// Run the version command.
pub fn run() {
    println!("edgeship-agent {}", env!("CARGO_PKG_VERSION"));
}
