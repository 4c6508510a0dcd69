use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::Cli;

pub fn init_logging(cli: &Cli) {
    if std::env::var("RUST_LOG").is_err() {
        match cli.debug {
            0 => std::env::set_var("RUST_LOG", "palisade=info"),
            1 => std::env::set_var("RUST_LOG", "palisade=debug"),
            _ => std::env::set_var("RUST_LOG", "debug"),
        }
    }

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().compact().with_target(false))
        .init();
}
