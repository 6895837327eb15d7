//! Settings read from `LILA_*` environment variables.
//!
//! The process environment is read once by [`init`]. Command line flags take precedence over
//! anything set here.

use std::cell::Cell;

/// Print every executed instruction to stderr when set to `1`.
pub const TRACE_VAR: &str = "LILA_TRACE";
/// Default step limit for `run` when `--max-steps` is not given.
pub const MAX_STEPS_VAR: &str = "LILA_MAX_STEPS";

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Settings {
    pub trace: bool,
    pub max_steps: Option<u64>,
}

impl Settings {
    /// Build settings from any variable lookup. Unparsable values are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let trace = lookup(TRACE_VAR).is_some_and(|v| v.trim() == "1");
        let max_steps = lookup(MAX_STEPS_VAR).and_then(|v| v.trim().parse().ok());
        Settings { trace, max_steps }
    }

    pub fn from_process() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

thread_local! {
    static SETTINGS: Cell<Option<Settings>> = const { Cell::new(None) };
}

/// Read settings from the process environment. Later calls keep the first reading.
pub fn init() {
    SETTINGS.with(|cell| {
        if cell.get().is_none() {
            cell.set(Some(Settings::from_process()));
        }
    });
}

/// Settings from [`init`], or the defaults if it was never called.
pub fn settings() -> Settings {
    SETTINGS.with(|cell| cell.get().unwrap_or_default())
}

pub fn is_trace_enabled() -> bool {
    settings().trace
}

pub fn max_steps() -> Option<u64> {
    settings().max_steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, val)| val.to_string())
        }
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(Settings::from_lookup(lookup(&[])), Settings::default());
    }

    #[test]
    fn trace_only_on_one() {
        assert!(Settings::from_lookup(lookup(&[("LILA_TRACE", "1")])).trace);
        assert!(!Settings::from_lookup(lookup(&[("LILA_TRACE", "0")])).trace);
        assert!(!Settings::from_lookup(lookup(&[("LILA_TRACE", "yes")])).trace);
    }

    #[test]
    fn max_steps_parsed() {
        let settings = Settings::from_lookup(lookup(&[("LILA_MAX_STEPS", " 250 ")]));
        assert_eq!(settings.max_steps, Some(250));

        let settings = Settings::from_lookup(lookup(&[("LILA_MAX_STEPS", "lots")]));
        assert_eq!(settings.max_steps, None);
        let settings = Settings::from_lookup(lookup(&[("LILA_MAX_STEPS", "-3")]));
        assert_eq!(settings.max_steps, None);
    }

    #[test]
    fn uninitialized_thread_uses_defaults() {
        // Each test runs on its own thread, so nothing has called `init` here
        assert_eq!(settings(), Settings::default());
        assert!(!is_trace_enabled());
    }
}
