//! Global constants for scanvault
//!
//! Centralized location for application-wide constants

/// Application subsystem identifier for macOS Unified Logging System
pub const APP_SUBSYSTEM: &str = "io.scanvault.engine";

/// Application directory name under the platform config/data dirs
pub const APP_DIR_NAME: &str = "scanvault";

/// Environment variable holding the log filter for the stderr backend
pub const LOG_ENV_VAR: &str = "SCANVAULT_LOG";

/// Storage key holding the `{ id: ScanResult }` blob in both tiers
pub const SCAN_RESULTS_KEY: &str = "scan_results";

/// Storage key holding the newest-first history array (durable tier only)
pub const SCAN_HISTORY_KEY: &str = "scan_history";

/// Maximum number of history rows kept
pub const DEFAULT_HISTORY_MAX: usize = 50;

/// Soft byte limit for the serialized durable tier
pub const DEFAULT_SOFT_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// Results kept when the soft limit is exceeded
pub const DEFAULT_MIN_RETAINED: usize = 10;

/// Results kept after a failed durable write, before the single retry
pub const DEFAULT_EMERGENCY_RETAINED: usize = 5;

/// Output buffer ceiling for the scanner process. Scripted and OS detection
/// runs can be very verbose.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 100 * 1024 * 1024;

/// Byte ceiling for the in-memory session tier. When a save would exceed it
/// the tier is reset to hold only the newest result.
pub const DEFAULT_SESSION_CAPACITY_BYTES: usize = 256 * 1024 * 1024;

/// Timing template used when none is requested
pub const DEFAULT_TIMING_LEVEL: u8 = 4;

/// Highest timing template the scanner accepts
pub const MAX_TIMING_LEVEL: u8 = 5;

/// Port range used by scan types that always probe a port list
pub const DEFAULT_PORT_RANGE: &str = "1-1000";

/// Executable name of the scanner on PATH
pub const DEFAULT_TOOL_NAME: &str = "nmap";

/// Standard Windows install locations probed by the tool locator
pub const WINDOWS_TOOL_PATHS: &[&str] = &[
    "C:\\Program Files (x86)\\Nmap\\nmap.exe",
    "C:\\Program Files\\Nmap\\nmap.exe",
];

/// Marker printed by `nmap --version`
pub const TOOL_VERSION_MARKER: &str = "Nmap version";

/// Benign stderr noise emitted by the scanner during timing adjustments
pub const BENIGN_STDERR_MARKER: &str = "RTTVAR";
