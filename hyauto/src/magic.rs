/// Name of the environment variable containing the path to the automaton settings file.
/// If not set, defaults to
///  (1) on Linux and macOS: `$XDG_CONFIG_HOME/hyauto/settings.toml` or `$HOME/.config/hyauto/settings.toml`
///  (2) on Windows: `%APPDATA%\hyauto\settings.toml`
pub const ENV_SETTINGS_PATH: &str = "HYAUTO_SETTINGS_PATH";

/// Separator used when building merged mode names during flattening.
pub const MODE_NAME_SEPARATOR: &str = "_";

/// Name of the urgent dispatcher mode added by the standard-form conversion.
pub const INIT_MODE_NAME: &str = "_init";

/// Name of the sink mode added by the standard-form conversion.
pub const ERROR_MODE_NAME: &str = "_error";

/// Time variable added by time-triggered hybridization when the model has none.
pub const TIME_TRIGGER_VARIABLE: &str = "_time_trigger";

/// Countdown variable of mixed-triggered hybridization.
pub const MIXED_TRIGGER_VARIABLE: &str = "_tt";

/// Coefficients and residual bounds whose magnitude is below this value are dropped.
pub const COEFFICIENT_TOLERANCE: f64 = 1e-9;

/// Relative step used for central-difference Jacobian estimates.
pub const JACOBIAN_STEP: f64 = 1e-6;

/// Upper bound on the number of LUT conversions performed on one model.
pub const MAX_LUT_CONVERSIONS: usize = 1000;

/// Samples per dimension used by the sampling bound fallback.
pub const SAMPLING_POINTS_PER_DIM: usize = 16;

/// Simulation micro-steps per time-triggered window.
pub const MICRO_STEPS_PER_WINDOW: usize = 20;

/// Default timeout for numeric bridge calls.
pub const DEFAULT_BRIDGE_TIMEOUT_MS: u64 = 30_000;
