// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, bail, Context, Result};
use classb_freq::{Config, DerivedLimits, Prescaler};
use num_traits::FromPrimitive;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Environment variable carrying the task's `[config]` section as TOML.
pub const TASK_CONFIG_VAR: &str = "HUBRIS_TASK_CONFIG";

/// Pulls the task configuration. This will fail if the configuration doesn't
/// exist or can't parse.
///
/// Thanks to Serde, `T` only needs to describe the parts of the
/// configuration a particular build task cares about.
pub fn task_config<T: DeserializeOwned>() -> Result<T> {
    task_maybe_config()?.ok_or_else(|| {
        anyhow!("missing task config (${} is not set)", TASK_CONFIG_VAR)
    })
}

/// Pulls the task configuration, or `None` if the configuration is not
/// provided.
pub fn task_maybe_config<T: DeserializeOwned>() -> Result<Option<T>> {
    toml_from_env(TASK_CONFIG_VAR)
}

/// Frequency self-test settings, as written in the task's `[config]`
/// section:
///
/// ```toml
/// system-frequency-hz = 2_000_000
/// prescaler = 64
/// tolerance-percent = 25
/// timebase-period = 32
/// timebase-frequency-hz = 1000
/// ```
///
/// `counter-width` may be given as well and defaults to 16.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FreqTestConfig {
    pub system_frequency_hz: u32,
    pub prescaler: u32,
    pub tolerance_percent: u32,
    pub timebase_period: u32,
    pub timebase_frequency_hz: u32,
    #[serde(default = "default_counter_width")]
    pub counter_width: u32,
}

fn default_counter_width() -> u32 {
    classb_freq::DEFAULT_COUNTER_WIDTH
}

impl FreqTestConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("deserializing frequency test config")
    }

    pub fn to_config(&self) -> Result<Config> {
        let prescaler = match Prescaler::from_u32(self.prescaler) {
            Some(p) => p,
            None => bail!(
                "prescaler {} is not one of 1, 2, 4, 8, 64, 256, 1024",
                self.prescaler
            ),
        };

        Ok(Config {
            system_frequency_hz: self.system_frequency_hz,
            prescaler,
            tolerance_percent: self.tolerance_percent,
            timebase_period: self.timebase_period,
            timebase_frequency_hz: self.timebase_frequency_hz,
            counter_width: self.counter_width,
        })
    }

    /// Checks the configuration the same way the firmware will, so a bad one
    /// fails the build with a readable message.
    pub fn limits(&self) -> Result<DerivedLimits> {
        let config = self.to_config()?;
        config.derive().map_err(|e| {
            anyhow!("frequency test config {:?} is unusable: {:?}", self, e)
        })
    }
}

/// Pulls the frequency test configuration from the task config.
pub fn freq_test_config() -> Result<FreqTestConfig> {
    task_config()
}

/// Renders `FREQ_TEST_CONFIG` and `FREQ_TEST_LIMITS` as Rust source, for a
/// task to `include!`. The limits are derived again by the compiler, so the
/// values in the comment are for humans only.
pub fn freq_test_consts(cfg: &FreqTestConfig) -> Result<String> {
    let limits = cfg.limits()?;
    let config = cfg.to_config()?;

    let mut out = String::new();
    out.push_str(&format!(
        "// reference count {}, max deviation {}, max overflows {}\n",
        limits.reference_count(),
        limits.max_abs_diff(),
        limits.max_overflow_count()
    ));
    out.push_str(
        "pub const FREQ_TEST_CONFIG: classb_freq::Config = \
         classb_freq::Config {\n",
    );
    out.push_str(&format!(
        "    system_frequency_hz: {},\n",
        config.system_frequency_hz
    ));
    out.push_str(&format!(
        "    prescaler: classb_freq::Prescaler::{:?},\n",
        config.prescaler
    ));
    out.push_str(&format!(
        "    tolerance_percent: {},\n",
        config.tolerance_percent
    ));
    out.push_str(&format!(
        "    timebase_period: {},\n",
        config.timebase_period
    ));
    out.push_str(&format!(
        "    timebase_frequency_hz: {},\n",
        config.timebase_frequency_hz
    ));
    out.push_str(&format!("    counter_width: {},\n", config.counter_width));
    out.push_str("};\n");
    out.push_str(
        "pub const FREQ_TEST_LIMITS: classb_freq::DerivedLimits =\n    \
         match FREQ_TEST_CONFIG.derive() {\n        \
         Ok(limits) => limits,\n        \
         Err(_) => panic!(\"invalid frequency test configuration\"),\n    \
         };\n",
    );

    Ok(out)
}

/// Build script entry point: writes the frequency test constants to
/// `$OUT_DIR/<name>`.
pub fn write_freq_test_config(name: &str) -> Result<()> {
    let cfg = freq_test_config()?;
    let out = PathBuf::from(
        env::var_os("OUT_DIR").ok_or_else(|| anyhow!("OUT_DIR not set"))?,
    );
    let path = out.join(name);
    let mut file = File::create(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    write!(file, "{}", freq_test_consts(&cfg)?)?;
    Ok(())
}

/// Parse the contents of an environment variable as toml.
///
/// Returns:
///
/// - `Ok(Some(x))` if the environment variable is defined and the contents
///   deserialized correctly.
/// - `Ok(None)` if the environment variable is not defined.
/// - `Err(e)` if deserialization failed or the environment variable did not
///   contain UTF-8.
fn toml_from_env<T: DeserializeOwned>(var: &str) -> Result<Option<T>> {
    println!("cargo:rerun-if-env-changed={}", var);
    let config = match env::var(var) {
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("accessing environment variable {}", var)
            })
        }
        Ok(c) => c,
    };

    println!("--- toml for ${} ---", var);
    println!("{}", config);
    let rval = toml::from_slice(config.as_bytes())
        .context("deserializing configuration")?;
    Ok(Some(rval))
}
