//! `/startup.cfg` parser and the `StartupConfig` it fills (§3.1, §6).
//!
//! Only the keys this crate's in-scope components consume are interpreted here; unrecognised
//! keys (the out-of-scope desktop's `WALLPAPER` and friends) are silently ignored so this parser
//! stays forward-compatible with a config file written for the full system.

use alloc::string::{String, ToString};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Desktop,
    Terminal,
    Safe,
    Recovery,
    Installer,
    Network,
}

impl Default for BootMode {
    fn default() -> Self {
        BootMode::Desktop
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureCenterMode {
    Bypass,
    Enforce,
}

impl Default for SecureCenterMode {
    fn default() -> Self {
        SecureCenterMode::Enforce
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveTermOption {
    Off,
    On,
    Named(String),
}

impl Default for SaveTermOption {
    fn default() -> Self {
        SaveTermOption::Off
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub mode: BootMode,
    pub sc_mode: SecureCenterMode,
    pub sc_bypass: bool,
    pub ide_shared: bool,
    pub saveterm: SaveTermOption,
    pub poweroff_after_saveterm: bool,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Strips a `#`, `;` or `//` comment (including a trailing same-line one) from `line`.
fn strip_comment(line: &str) -> &str {
    let mut cut = line.len();
    if let Some(i) = line.find('#') {
        cut = cut.min(i);
    }
    if let Some(i) = line.find(';') {
        cut = cut.min(i);
    }
    if let Some(i) = line.find("//") {
        cut = cut.min(i);
    }
    &line[..cut]
}

/// Splits a `key=value` or `key value` line into its two halves.
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    if let Some(eq) = line.find('=') {
        Some((line[..eq].trim(), line[eq + 1..].trim()))
    } else {
        let mut parts = line.splitn(2, char::is_whitespace);
        let key = parts.next()?.trim();
        if key.is_empty() {
            return None;
        }
        Some((key, parts.next().unwrap_or("").trim()))
    }
}

impl StartupConfig {
    /// Parses `text` (the contents of `/startup.cfg`) into a config, applying recognised keys
    /// on top of the defaults and ignoring everything else.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for raw_line in text.lines() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = split_key_value(line) else {
                continue;
            };
            config.apply(key, value);
        }
        config
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key.to_ascii_uppercase().as_str() {
            "MODE" => {
                self.mode = match value.to_ascii_uppercase().as_str() {
                    "DESKTOP" => BootMode::Desktop,
                    "TERMINAL" => BootMode::Terminal,
                    "SAFE" => BootMode::Safe,
                    "RECOVERY" => BootMode::Recovery,
                    "INSTALLER" => BootMode::Installer,
                    "NETWORK" => BootMode::Network,
                    _ => self.mode,
                };
            }
            "SC_MODE" => {
                self.sc_mode = match value.to_ascii_uppercase().as_str() {
                    "BYPASS" => SecureCenterMode::Bypass,
                    "ENFORCE" => SecureCenterMode::Enforce,
                    _ => self.sc_mode,
                };
            }
            "SC_BYPASS" => {
                if let Some(b) = parse_bool(value) {
                    self.sc_bypass = b;
                }
            }
            "IDE_SHARED" => {
                if let Some(b) = parse_bool(value) {
                    self.ide_shared = b;
                }
            }
            "SAVETERM" => {
                self.saveterm = match value {
                    "0" => SaveTermOption::Off,
                    "1" => SaveTermOption::On,
                    other if !other.is_empty() => SaveTermOption::Named(other.to_string()),
                    _ => SaveTermOption::Off,
                };
            }
            "POWEROFF_AFTER_SAVETERM" => {
                if let Some(b) = parse_bool(value) {
                    self.poweroff_after_saveterm = b;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_desktop_enforce() {
        let config = StartupConfig::parse("");
        assert_eq!(config.mode, BootMode::Desktop);
        assert_eq!(config.sc_mode, SecureCenterMode::Enforce);
        assert_eq!(config.saveterm, SaveTermOption::Off);
    }

    #[test]
    fn recognised_keys_are_case_insensitive_and_comments_are_stripped() {
        let text = "\
            mode = SAFE ; boot into safe mode\n\
            SC_BYPASS=1 # dev override\n\
            saveterm log.txt\n\
            wallpaper=/desktop/bg.png\n\
            // a whole-line comment\n\
        ";
        let config = StartupConfig::parse(text);
        assert_eq!(config.mode, BootMode::Safe);
        assert!(config.sc_bypass);
        assert_eq!(config.saveterm, SaveTermOption::Named("log.txt".to_string()));
    }

    #[test]
    fn unrecognised_keys_are_ignored_not_rejected() {
        let config = StartupConfig::parse("THEME=dark\nMODE=TERMINAL\n");
        assert_eq!(config.mode, BootMode::Terminal);
    }
}
