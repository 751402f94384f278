use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    magic::ENV_SETTINGS_PATH,
    utils::error::{HyError, HyResult},
};

/// Reachability settings forwarded to SpaceEx-like printers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceExSettings {
    pub sampling_time: f64,
    pub time_horizon: f64,
    pub max_iterations: u32,
    pub directions: String,
    pub aggregation: String,
    pub flowpipe_tolerance: f64,
    pub output_format: String,
    /// Set by time-triggered hybridization so printers can emit a matching scenario.
    pub time_triggered: bool,
}

impl Default for SpaceExSettings {
    fn default() -> Self {
        Self {
            sampling_time: 0.1,
            time_horizon: 10.0,
            max_iterations: 10,
            directions: "oct".to_string(),
            aggregation: "none".to_string(),
            flowpipe_tolerance: 0.01,
            output_format: "GEN".to_string(),
            time_triggered: false,
        }
    }
}

/// Tool settings carried by a [`Configuration`](crate::ir::Configuration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomatonSettings {
    /// Horizontal and vertical plot axes. Empty strings mean "not assigned".
    pub plot_variable_names: [String; 2],
    pub spaceex: SpaceExSettings,
    /// Worker count for per-cell parallel work.
    pub simulation_threads: usize,
}

impl Default for AutomatonSettings {
    fn default() -> Self {
        Self {
            plot_variable_names: [String::new(), String::new()],
            spaceex: SpaceExSettings::default(),
            simulation_threads: 1,
        }
    }
}

impl AutomatonSettings {
    /// Get the default path to the settings file.
    pub fn default_path() -> PathBuf {
        if let Ok(config_path) = std::env::var(ENV_SETTINGS_PATH) {
            return config_path.into();
        }

        let mut path = PathBuf::new();

        #[cfg(target_os = "windows")]
        {
            if let Ok(appdata) = std::env::var("APPDATA") {
                path.push(appdata);
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
                path.push(xdg_config_home);
            } else if let Ok(home) = std::env::var("HOME") {
                path.push(home);
                path.push(".config");
            }
        }

        path.push("hyauto");
        path.push("settings.toml");
        path
    }

    pub fn load_from_toml(path: &Path) -> HyResult<Self> {
        let toml_str = std::fs::read_to_string(path)?;

        toml::from_str(&toml_str).map_err(|e| HyError::SettingsParse {
            source: e,
            file: path.display().to_string(),
        })
    }

    pub fn save_to_toml(&self, path: &Path) -> HyResult<()> {
        let toml_str = toml::to_string(self).map_err(|e| {
            HyError::Unknown(format!(
                "Failed during serialization of TOML to path `{}`: {}",
                path.display(),
                e
            ))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, toml_str)?;
        Ok(())
    }
}

/// Parameter string of one pass invocation (the part after `flag:`).
///
/// Accepts `key=value` pairs and positional values separated by commas. Keys are
/// case-insensitive. Brackets and parentheses group, so `(0,1)` is one positional value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassParams {
    pub positional: Vec<String>,
    pub named: BTreeMap<String, String>,
}

impl PassParams {
    pub fn parse(text: &str) -> Self {
        let mut params = PassParams::default();

        for item in split_top_level(text, ',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match item.split_once('=') {
                Some((key, value)) if !key.contains(['(', '[']) => {
                    params
                        .named
                        .insert(key.trim().to_lowercase(), value.trim().to_string());
                }
                _ => params.positional.push(item.to_string()),
            }
        }

        params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.named.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.named.contains_key(&key.to_lowercase())
            || self.positional.iter().any(|p| p.eq_ignore_ascii_case(key))
    }

    /// Numeric named parameter; `pass` is used in the error message.
    pub fn get_f64(&self, pass: &str, key: &str) -> HyResult<Option<f64>> {
        self.get(key)
            .map(|v| {
                v.parse::<f64>().map_err(|_| {
                    HyError::invalid_parameter(pass, format!("`{key}` must be a number, got `{v}`"))
                })
            })
            .transpose()
    }

    pub fn require_f64(&self, pass: &str, key: &str) -> HyResult<f64> {
        self.get_f64(pass, key)?
            .ok_or_else(|| HyError::invalid_parameter(pass, format!("missing parameter `{key}`")))
    }

    pub fn get_usize(&self, pass: &str, key: &str) -> HyResult<Option<usize>> {
        self.get(key)
            .map(|v| {
                v.parse::<usize>().map_err(|_| {
                    HyError::invalid_parameter(
                        pass,
                        format!("`{key}` must be a non-negative integer, got `{v}`"),
                    )
                })
            })
            .transpose()
    }
}

/// Split on `sep` outside of `()` and `[]` groups.
pub fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            c if c == sep && depth == 0 => {
                out.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&text[start..]);
    out
}

/// Parse `(a, b)` or `a,b` into two numbers.
pub fn parse_pair(pass: &str, text: &str) -> HyResult<(f64, f64)> {
    let inner = text
        .trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']']);
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [a, b] => {
            let parse = |s: &str| {
                s.parse::<f64>().map_err(|_| {
                    HyError::invalid_parameter(pass, format!("expected a number, got `{s}`"))
                })
            };
            Ok((parse(a)?, parse(b)?))
        }
        _ => Err(HyError::invalid_parameter(
            pass,
            format!("expected a pair `(min, max)`, got `{text}`"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_positional_parameters() {
        let p = PassParams::parse("Step=0.5, maxtime=10,(0, 1),noforbidden");
        assert_eq!(p.get("step"), Some("0.5"));
        assert_eq!(p.get("MAXTIME"), Some("10"));
        assert_eq!(p.positional, vec!["(0, 1)".to_string(), "noforbidden".to_string()]);
        assert!(p.has("noforbidden"));
        assert_eq!(p.require_f64("tt", "step").unwrap(), 0.5);
        assert!(p.require_f64("tt", "epsilon").unwrap_err().is_invalid_parameter());
    }

    #[test]
    fn pairs_accept_brackets() {
        assert_eq!(parse_pair("grid", "(-1, 2.5)").unwrap(), (-1.0, 2.5));
        assert_eq!(parse_pair("grid", "[0,1]").unwrap(), (0.0, 1.0));
        assert!(parse_pair("grid", "(1)").is_err());
    }

    #[test]
    fn settings_roundtrip_through_toml() {
        let dir = std::env::temp_dir().join(format!("hyauto-conf-{}", std::process::id()));
        let path = dir.join("nested").join("settings.toml");

        let mut settings = AutomatonSettings::default();
        settings.plot_variable_names = ["x".into(), "t".into()];
        settings.spaceex.time_horizon = 2.5;
        settings.simulation_threads = 4;
        settings.save_to_toml(&path).unwrap();

        let loaded = AutomatonSettings::load_from_toml(&path).unwrap();
        assert_eq!(loaded, settings);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_settings_name_the_file() {
        let path = std::env::temp_dir().join(format!("hyauto-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "simulation_threads = \"many\"").unwrap();
        let err = AutomatonSettings::load_from_toml(&path).unwrap_err();
        assert!(err.is_settings_parse());
        let _ = std::fs::remove_file(&path);
    }
}
