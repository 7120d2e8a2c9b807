use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes env_logger once for the whole test binary.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
            .is_test(true)
            .try_init();
    });
}
