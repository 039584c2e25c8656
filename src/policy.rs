//! Fixed keys and timings shared by the reducer and the effect runner.

/// Storage key under which the runtime persists its last DOM snapshot.
pub const COMMAND_RUNTIME_STORAGE_KEY: &str = "xeg:command-runtime:v1";

/// Storage key holding the gallery's user settings.
pub const APP_SETTINGS_STORAGE_KEY: &str = "xeg-app-settings";

pub const COMMAND_RUNTIME_DEFAULT_TICK_MS: u64 = 30_000;

pub const COMMAND_RUNTIME_TICK_ID: &str = "command-runtime:main";

/// Renders an error chain as a single line for failure events.
pub fn format_error_message(err: &anyhow::Error) -> String {
    let message = format!("{err:#}");
    if message.trim().is_empty() {
        "Unknown error".to_string()
    } else {
        message
    }
}
