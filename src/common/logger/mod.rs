use std::{fs, path::Path, sync::OnceLock};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;
pub mod writer;

pub use formatter::*;
pub use writer::*;

use crate::{chime::SystemClock, configs::LoggingConfig};

pub(crate) static GLOBAL_FILE_WRITER: OnceLock<LineCappedFileWriter> = OnceLock::new();

/// Clock for log timestamps, shared with the scheduler.
pub(crate) static LOG_CLOCK: OnceLock<SystemClock> = OnceLock::new();

pub fn set_clock(clock: SystemClock) {
    let _ = LOG_CLOCK.set(clock);
}

/// `println!` that is mirrored into the log file once logging is set up.
#[macro_export]
macro_rules! log_println {
    () => {{
        std::println!();
        $crate::common::logger::append_to_file_raw("\n");
    }};
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        std::println!("{}", msg);
        $crate::common::logger::append_to_file_raw(&format!("{}\n", msg));
    }};
}

pub fn append_to_file_raw(msg: &str) {
    if let Some(mut writer) = GLOBAL_FILE_WRITER.get().cloned() {
        use std::io::Write;
        let _ = writer.write_all(strip_ansi_escapes(msg).as_bytes());
    }
}

/// Builds the directive string handed to `EnvFilter`.
///
/// Songbird and serenity are chatty at `info`, so they are capped at `warn`
/// unless the configured filters say otherwise.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let level = config.level.as_deref().unwrap_or("info");
    let mut directives = format!("{},serenity=warn,songbird=warn,symphonia=warn", level);
    if let Some(filters) = config.filters.as_deref().filter(|f| !f.is_empty()) {
        directives.push(',');
        directives.push_str(filters);
    }
    directives
}

pub fn init(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let stdout_layer = fmt::layer()
        .event_format(ChimeFormatter::new(true))
        .with_ansi(true);

    let file_layer = config.file.as_ref().map(|file_config| {
        if let Some(parent) = Path::new(&file_config.path).parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Failed to create log directory: {}", e);
            }
        }

        let writer = LineCappedFileWriter::new(file_config.path.clone(), file_config.max_lines);
        let _ = GLOBAL_FILE_WRITER.set(writer.clone());
        fmt::layer()
            .with_writer(writer)
            .event_format(ChimeFormatter::new(false))
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}
