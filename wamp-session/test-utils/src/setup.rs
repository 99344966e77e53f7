use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the global log subscriber for tests.
///
/// Library logs are emitted through the `log` facade, which the fmt subscriber picks up.
pub fn setup_test_environment() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing_core::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_test_writer()
            .init();
    });
}
