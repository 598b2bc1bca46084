//! Recognized environment variables collected into one config struct
//! so the dispatch executor and the CLI binary share a single parse.
use std::env;

/// Typed, validated view of `TALVOS_INTERACTIVE` / `TALVOS_NUM_WORKERS` /
/// `TALVOS_PLUGINS`. Constructed once per process; the dispatch executor
/// reads it when `run()`s a dispatch rather than re-parsing the environment
/// per call.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub interactive: bool,
    pub num_workers: Option<usize>,
    pub plugin_paths: Vec<String>,
}
impl RunnerConfig {
    pub fn from_env() -> RunnerConfig {
        RunnerConfig {
            interactive: read_bool("TALVOS_INTERACTIVE", false),
            num_workers: read_usize("TALVOS_NUM_WORKERS"),
            plugin_paths: read_list("TALVOS_PLUGINS"),
        }
    }

    /// Worker count the dispatch executor should use, honouring interactive
    /// mode and any non-thread-safe observer.
    pub fn resolved_num_threads(&self, any_observer_unsafe: bool) -> usize {
        if self.interactive || any_observer_unsafe {
            return 1;
        }
        self.num_workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        })
    }
}

fn read_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => v != "0",
        Err(_) => default,
    }
}
fn read_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse::<usize>().ok()).filter(|n| *n > 0)
}
fn read_list(name: &str) -> Vec<String> {
    env::var(name)
        .ok()
        .map(|v| v.split(';').filter(|s| !s.is_empty()).map(str::to_owned).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_non_interactive() {
        // Isolated from the process environment; exercise the parsing
        // helpers directly rather than racing other tests over env vars.
        assert_eq!(read_bool("TALVOS_INTERACTIVE_TEST_UNSET", false), false);
        assert_eq!(read_usize("TALVOS_NUM_WORKERS_TEST_UNSET"), None);
        assert!(read_list("TALVOS_PLUGINS_TEST_UNSET").is_empty());
    }

    #[test]
    fn resolved_threads_forced_to_one_when_interactive() {
        let cfg = RunnerConfig { interactive: true, num_workers: Some(8), plugin_paths: vec![] };
        assert_eq!(cfg.resolved_num_threads(false), 1);
    }

    #[test]
    fn resolved_threads_forced_to_one_when_observer_unsafe() {
        let cfg = RunnerConfig { interactive: false, num_workers: Some(8), plugin_paths: vec![] };
        assert_eq!(cfg.resolved_num_threads(true), 1);
    }
}
