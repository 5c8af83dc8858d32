use tracing::Level;

/// Install a fmt subscriber at the given level.
///
/// Returns false if a global subscriber was already installed, which is the
/// normal case when several tests in one binary each ask for logging.
pub fn init_logging(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let _ = init_logging(Level::DEBUG);
        assert!(!init_logging(Level::DEBUG));
    }
}
