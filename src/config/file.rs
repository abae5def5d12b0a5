//! INI config file loading.
//!
//! Unknown keys are ignored; unparseable values fall back to the default
//! with a warning, so a typo degrades gracefully instead of refusing to
//! start.

use super::settings::Settings;
use ini::Ini;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Error loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or parsed as INI.
    #[error("config file error: {0}")]
    Ini(#[from] ini::Error),
}

/// Loads settings from an INI file, filling gaps with defaults.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let ini = Ini::load_from_file(path.as_ref())?;
    let mut settings = Settings::default();

    {
        let c = &mut settings.cluster;
        get(&ini, "cluster", "min_workers", &mut c.min_workers);
        get(&ini, "cluster", "max_workers", &mut c.max_workers);
        get(&ini, "cluster", "scale_up_threshold", &mut c.scale_up_threshold);
        get(&ini, "cluster", "scale_down_threshold", &mut c.scale_down_threshold);
        get(&ini, "cluster", "worker_capacity", &mut c.worker_capacity);
        get_secs(&ini, "cluster", "scale_interval_secs", &mut c.scale_interval);
    }

    {
        let p = &mut settings.pool;
        get(&ini, "pool", "max_concurrent_jobs", &mut p.max_concurrent_jobs);
        get(
            &ini,
            "pool",
            "max_large_file_concurrent",
            &mut p.max_large_file_concurrent,
        );
        get(
            &ini,
            "pool",
            "large_file_threshold_mb",
            &mut p.large_file_threshold_mb,
        );
        if let Some(dir) = value(&ini, "pool", "scratch_dir") {
            p.scratch_dir = Some(dir.into());
        }
        get_secs(&ini, "pool", "scratch_max_age_secs", &mut p.scratch_max_age);
    }

    {
        let m = &mut settings.memory;
        get(&ini, "memory", "max_memory_usage_mb", &mut m.max_memory_usage_mb);
        get_secs(&ini, "memory", "sample_interval_secs", &mut m.sample_interval);
    }

    {
        let b = &mut settings.breaker;
        get(&ini, "breaker", "failure_threshold", &mut b.failure_threshold);
        get_millis(&ini, "breaker", "circuit_timeout_ms", &mut b.circuit_timeout);
        get(&ini, "breaker", "half_open_max_calls", &mut b.half_open_max_calls);
        get_secs(
            &ini,
            "breaker",
            "monitor_interval_secs",
            &mut b.monitor_interval,
        );
    }

    {
        let r = &mut settings.retry;
        get(&ini, "retry", "max_retries", &mut r.max_retries);
        get_millis(&ini, "retry", "base_delay_ms", &mut r.base_delay);
        get_millis(&ini, "retry", "max_delay_ms", &mut r.max_delay);
    }

    {
        let h = &mut settings.health;
        get_millis(
            &ini,
            "health",
            "worker_health_check_interval_ms",
            &mut h.worker_health_check_interval,
        );
        get_millis(&ini, "health", "heartbeat_interval_ms", &mut h.heartbeat_interval);
        get_millis(
            &ini,
            "health",
            "heartbeat_stale_after_ms",
            &mut h.heartbeat_stale_after,
        );
        get_millis(&ini, "health", "job_timeout_ms", &mut h.job_timeout);
        get_secs(&ini, "health", "recovery_window_secs", &mut h.recovery_window);
    }

    {
        let l = &mut settings.logging;
        if let Some(dir) = value(&ini, "logging", "dir") {
            l.dir = dir.to_string();
        }
        if let Some(file) = value(&ini, "logging", "file") {
            l.file = file.to_string();
        }
    }

    Ok(settings)
}

fn value<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    ini.section(Some(section)).and_then(|props| props.get(key))
}

fn get<T: FromStr + Copy>(ini: &Ini, section: &str, key: &str, target: &mut T) {
    if let Some(raw) = value(ini, section, key) {
        match raw.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(section, key, value = raw, "Invalid config value, using default"),
        }
    }
}

fn get_millis(ini: &Ini, section: &str, key: &str, target: &mut Duration) {
    let mut ms = target.as_millis() as u64;
    get(ini, section, key, &mut ms);
    *target = Duration::from_millis(ms);
}

fn get_secs(ini: &Ini, section: &str, key: &str, target: &mut Duration) {
    let mut secs = target.as_secs();
    get(ini, section, key, &mut secs);
    *target = Duration::from_secs(secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_overrides_and_defaults() {
        let file = write_config(
            "[cluster]\n\
             min_workers = 4\n\
             max_workers = 12\n\
             \n\
             [retry]\n\
             max_retries = 5\n\
             base_delay_ms = 250\n",
        );

        let settings = load_settings(file.path()).unwrap();
        assert_eq!(settings.cluster.min_workers, 4);
        assert_eq!(settings.cluster.max_workers, 12);
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
        // Untouched sections keep defaults.
        assert_eq!(
            settings.pool.max_concurrent_jobs,
            super::super::defaults::DEFAULT_MAX_CONCURRENT_JOBS
        );
    }

    #[test]
    fn test_invalid_value_falls_back_to_default() {
        let file = write_config("[cluster]\nmin_workers = lots\n");
        let settings = load_settings(file.path()).unwrap();
        assert_eq!(
            settings.cluster.min_workers,
            super::super::defaults::DEFAULT_MIN_WORKERS
        );
    }

    #[test]
    fn test_scratch_dir_parsed_as_path() {
        let file = write_config("[pool]\nscratch_dir = /tmp/docstream-scratch\n");
        let settings = load_settings(file.path()).unwrap();
        assert_eq!(
            settings.pool.scratch_dir.as_deref(),
            Some(std::path::Path::new("/tmp/docstream-scratch"))
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_settings("/nonexistent/docstream.ini").is_err());
    }
}
