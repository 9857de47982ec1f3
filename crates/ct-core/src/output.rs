//! Output settings handed from the CLI to the session layer

/// How chatty the client should be
///
/// Built once from command-line flags and passed explicitly, so the session
/// code never consults process-wide state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// Suppress everything except errors and command output
    pub quiet: bool,
    /// Verbosity level from repeated `-v`
    pub verbose: u8,
}

impl OutputConfig {
    /// Create output settings from CLI flags
    pub fn new(quiet: bool, verbose: u8) -> Self {
        Self { quiet, verbose }
    }

    /// Whether status lines (connecting, detached, ...) should be shown
    pub fn show_status(&self) -> bool {
        !self.quiet
    }

    /// Log filter matching the flags
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "info",
            (false, 2) => "debug",
            (false, _) => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level() {
        assert_eq!(OutputConfig::new(true, 3).log_level(), "error");
        assert_eq!(OutputConfig::new(false, 0).log_level(), "warn");
        assert_eq!(OutputConfig::new(false, 2).log_level(), "debug");
        assert_eq!(OutputConfig::new(false, 9).log_level(), "trace");
    }

    #[test]
    fn test_quiet_hides_status() {
        assert!(!OutputConfig::new(true, 0).show_status());
        assert!(OutputConfig::default().show_status());
    }
}
