use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() {
    // RUST_LOG overrides the default filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jsonex=warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(err) = jsonex_cli::run_from_env() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
