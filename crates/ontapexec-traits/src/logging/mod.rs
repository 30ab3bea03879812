/// Installs the process-wide tracing subscriber.
pub trait LoggingService {
    fn init_logging(
        level: &str,
        use_color: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
