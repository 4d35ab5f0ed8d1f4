pub fn setup_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt::time::ChronoLocal;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .pretty()
                .with_timer(ChronoLocal::rfc_3339()),
        )
        .with(EnvFilter::from_default_env())
        .with(ErrorLayer::default())
        .init();
}
