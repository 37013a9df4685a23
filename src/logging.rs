/// Initializes the logger with the `env_logger` crate, honoring `RUST_LOG`.
pub fn init_logger() {
    env_logger::init();
}
