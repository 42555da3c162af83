//! Runtime knobs read from the environment.

use iconx_gc::GrowthPolicy;
use iconx_vm::VmConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
    #[error("environment variable {name} must be positive")]
    Zero { name: &'static str },
}

/// Sizes, ceilings and flags for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Initial `&trace`; `None` keeps the value recorded in the image.
    pub trace: Option<i64>,
    pub io_buffers: usize,
    pub coexpr_stack_slots: u32,
    pub string_region: usize,
    pub block_region: usize,
    pub static_region: usize,
    pub static_increment: usize,
    pub main_stack_slots: u32,
    /// Abort the process on a fatal error instead of exiting.
    pub core_dump: bool,
    pub unbuffered_errout: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let vm = VmConfig::default();
        Self {
            trace: None,
            io_buffers: vm.io_buffers,
            coexpr_stack_slots: vm.coexpr_stack_slots,
            string_region: vm.string_region,
            block_region: vm.block_region,
            static_region: vm.static_region,
            static_increment: vm.static_region / 4,
            main_stack_slots: vm.main_stack_slots,
            core_dump: false,
            unbuffered_errout: false,
        }
    }
}

fn number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn positive<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
{
    let n: T = number(name, value)?;
    if n == T::default() {
        return Err(ConfigError::Zero { name });
    }
    Ok(n)
}

impl RuntimeConfig {
    /// Reads the knobs through `lookup`, which maps a variable name to its value.
    ///
    /// Unset variables keep their defaults. `STATINCR` defaults to a quarter of the static
    /// region, whatever `STATSIZE` says.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = RuntimeConfig::default();
        if let Some(v) = lookup("TRACE") {
            config.trace = Some(number("TRACE", &v)?);
        }
        if let Some(v) = lookup("NBUFS") {
            config.io_buffers = number("NBUFS", &v)?;
        }
        if let Some(v) = lookup("COEXPSIZE") {
            config.coexpr_stack_slots = positive("COEXPSIZE", &v)?;
        }
        if let Some(v) = lookup("STRSIZE") {
            config.string_region = positive("STRSIZE", &v)?;
        }
        if let Some(v) = lookup("HEAPSIZE") {
            config.block_region = positive("HEAPSIZE", &v)?;
        }
        if let Some(v) = lookup("STATSIZE") {
            config.static_region = positive("STATSIZE", &v)?;
        }
        config.static_increment = match lookup("STATINCR") {
            Some(v) => positive("STATINCR", &v)?,
            None => config.static_region / 4,
        };
        if let Some(v) = lookup("MSTKSIZE") {
            config.main_stack_slots = positive("MSTKSIZE", &v)?;
        }
        config.core_dump = lookup("ICONCORE").is_some();
        config.unbuffered_errout = lookup("NOERRBUF").is_some();
        log::debug!("runtime configuration: {config:?}");
        Ok(config)
    }

    /// Reads the knobs from the process environment.
    pub fn from_process_env() -> Result<Self, ConfigError> {
        Self::from_env(|name| std::env::var(name).ok())
    }

    pub fn vm_config(&self) -> VmConfig {
        VmConfig {
            block_region: self.block_region,
            string_region: self.string_region,
            static_region: self.static_region,
            main_stack_slots: self.main_stack_slots,
            coexpr_stack_slots: self.coexpr_stack_slots,
            trace: self.trace,
            io_buffers: self.io_buffers,
            growth: GrowthPolicy {
                static_increment: self.static_increment.max(1),
                ..GrowthPolicy::default()
            },
            metrics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_the_interpreter() {
        let config = RuntimeConfig::from_env(env(&[])).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.vm_config(), VmConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = RuntimeConfig::from_env(env(&[
            ("TRACE", "-1"),
            ("STRSIZE", "4096"),
            ("STATSIZE", "8000"),
            ("MSTKSIZE", "300"),
            ("ICONCORE", ""),
        ]))
        .unwrap();
        assert_eq!(config.trace, Some(-1));
        assert_eq!(config.string_region, 4096);
        assert_eq!(config.static_increment, 2000);
        assert_eq!(config.main_stack_slots, 300);
        assert!(config.core_dump);
        assert!(!config.unbuffered_errout);

        let vm = config.vm_config();
        assert_eq!(vm.trace, Some(-1));
        assert_eq!(vm.growth.static_increment, 2000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = RuntimeConfig::from_env(env(&[("HEAPSIZE", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "HEAPSIZE",
                value: "lots".to_string()
            }
        );
        let err = RuntimeConfig::from_env(env(&[("COEXPSIZE", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::Zero { name: "COEXPSIZE" });
    }
}
