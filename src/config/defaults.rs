//! Default configuration values

/// Artifact file extension
pub const PACKAGE_EXTENSION: &str = "hpkg";

/// Extension of recipe-derived package info files
pub const DEPENDENCY_INFO_EXTENSION: &str = "DependencyInfo";

/// Architecture tag of architecture independent packages
pub const ANY_ARCHITECTURE: &str = "any";

/// Architecture tag of source packages
pub const SOURCE_ARCHITECTURE: &str = "source";

/// Default target architecture
pub const DEFAULT_TARGET_ARCHITECTURE: &str = "x86_64";

/// SSH connect timeout (in seconds)
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// SSH keepalive interval (in seconds)
pub const KEEPALIVE_INTERVAL_SECS: u64 = 15;

/// Base delay before a reconnect attempt (in seconds)
pub const RECONNECT_DELAY_BASE_SECS: f64 = 5.0;

/// Additional reconnect delay per consecutive error (in seconds)
pub const RECONNECT_DELAY_FACTOR_SECS: f64 = 1.2;

/// Consecutive connection errors before a builder is lost
pub const DEFAULT_MAX_CONNECTION_ERRORS: u32 = 100;

/// Attempts per upload or download
pub const TRANSFER_ATTEMPTS: u32 = 3;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default worker-side build tool
pub const DEFAULT_BUILD_TOOL: &str = "haikuporter";

/// Default command reading package files
pub const DEFAULT_PACKAGE_COMMAND: &str = "package";

/// Script sourced before running the build tool
pub const DEFAULT_ENV_SETUP: &str = "/boot/system/boot/SetupEnvironment";

/// Installed system packages on a worker
pub const DEFAULT_SYSTEM_PACKAGES_DIR: &str = "/boot/system/packages";

/// Default host key file, next to the worker config
pub const DEFAULT_HOST_KEY_FILE: &str = "known_hosts";

/// Worker config file name, relative to the worker ports tree
pub const BUILDER_CONFIG_FILE: &str = "builder.conf";

/// Packages directory, relative to the ports tree
pub const PACKAGES_DIR: &str = "packages";

/// Upload cache directory, relative to the packages directory
pub const PACKAGES_CACHE_DIR: &str = ".cache";

/// Obsoleted artifacts directory, relative to the packages directory
pub const OBSOLETE_DIR: &str = ".obsolete";

/// Master configuration file
pub const MASTER_CONFIG_FILE: &str = "buildmaster.toml";

/// Port catalog file, relative to the ports tree
pub const PORT_CATALOG_FILE: &str = "ports.toml";

/// Status snapshot file
pub const STATUS_FILE: &str = "status.json";

/// Build number file
pub const BUILD_NUMBER_FILE: &str = "buildnumber";

/// Master log file
pub const MASTER_LOG_FILE: &str = "master.log";

/// Number of samples for the impulse rate
pub const IMPULSE_WINDOW: usize = 500;

/// Sidecar suffix while uploading
pub const UPLOAD_SUFFIX: &str = "upload";

/// Sidecar suffix while downloading
pub const DOWNLOAD_SUFFIX: &str = "download";

/// Sidecar suffix while writing locally
pub const TEMP_SUFFIX: &str = "temp";
