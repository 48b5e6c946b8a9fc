use std::time::Duration;

pub const JOB_TX_ERR: &str = "Judge worker is not accepting submissions";

/// Scratch directory mounted as tmpfs inside every sandbox.
pub const WORKDIR: &str = "/workspace";

/// Keeps a freshly created sandbox alive until commands are exec'd into it.
pub const IDLE_COMMAND: [&str; 3] = ["sh", "-c", "sleep infinity"];

pub const TIME_LIMIT_EXCEEDED: &str = "Time Limit Exceeded";
pub const COMPILATION_TIMEOUT: &str = "Timeout during compilation";
pub const STAGING_TIMEOUT: &str = "Timeout while staging source";
pub const INPUT_STAGING_FAILED: &str = "Failed to stage test input";

/// Reported when the runtime has no exit code for a finished command.
pub const EXIT_CODE_UNAVAILABLE: i32 = -1;

/// Largest base64 payload passed as a single exec argument.
/// Linux refuses single arguments above 128 KiB (`MAX_ARG_STRLEN`).
pub const STAGE_CHUNK_BYTES: usize = 64 * 1024;

/// File the test input is staged to when it is too large to inline.
pub const STDIN_FILE: &str = "/workspace/.stdin";

// Fixed shell scripts. Untrusted content only ever arrives as base64 in a
// positional parameter, never spliced into the script text.
pub const WRITE_CHUNK_SCRIPT: &str = r#"printf '%s' "$1" > "$2""#;
pub const APPEND_CHUNK_SCRIPT: &str = r#"printf '%s' "$1" >> "$2""#;
pub const DECODE_FILE_SCRIPT: &str = r#"base64 -d "$1" > "$2" && rm -f "$1""#;
pub const PIPE_INPUT_SCRIPT: &str = r#"input=$1; shift; printf '%s' "$input" | base64 -d | "$@""#;
pub const REDIRECT_INPUT_SCRIPT: &str = r#"file=$1; shift; "$@" < "$file""#;

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 100 * 1024;
