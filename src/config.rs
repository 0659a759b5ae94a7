use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Name of the RMS-style station configuration file inside a night directory.
pub const CONFIG_FILE: &str = ".config";

/// Station configuration loaded once per run.
///
/// Only the fields this tool consumes are kept; the source file carries many
/// more capture and detection settings which are ignored here.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub station_id: String,
    /// Capture frame rate in frames/second.
    pub fps: f64,
    /// Site latitude, degrees +N.
    pub latitude: f64,
    /// Site longitude, degrees +E.
    pub longitude: f64,
    /// Site elevation in meters.
    pub elevation: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            station_id: "XX0001".to_string(),
            fps: 25.0,
            latitude: 43.19301,
            longitude: -81.315555,
            elevation: 237.0,
        }
    }
}

impl Config {
    /// Parse the `.config` text format: INI-like sections, `key: value` or
    /// `key = value` pairs, `;` comments. Unknown keys are ignored and
    /// malformed values keep the bundled default for that field.
    pub fn parse_str(text: &str) -> Config {
        let mut config = Config::default();

        for line in text.lines() {
            // Strip inline and whole-line comments
            let line = match line.find(';') {
                Some(pos) => &line[..pos],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('[') {
                continue;
            }

            let Some((key, value)) = line.split_once([':', '=']) else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "stationid" => config.station_id = value.to_string(),
                "fps" => {
                    if let Ok(v) = value.parse() {
                        config.fps = v;
                    }
                }
                "latitude" => {
                    if let Ok(v) = value.parse() {
                        config.latitude = v;
                    }
                }
                "longitude" => {
                    if let Ok(v) = value.parse() {
                        config.longitude = v;
                    }
                }
                "elevation" => {
                    if let Ok(v) = value.parse() {
                        config.elevation = v;
                    }
                }
                _ => {}
            }
        }

        config
    }

    pub fn read(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Ok(Config::parse_str(&text))
    }
}

/// Load the station configuration from a night directory, degrading to the
/// bundled defaults with a warning when the file is missing.
pub fn load(dir: &Path) -> Config {
    let path = dir.join(CONFIG_FILE);
    match Config::read(&path) {
        Ok(config) => config,
        Err(_) => {
            warn!(
                "Could not find {} in {}, using default configuration",
                CONFIG_FILE,
                dir.display()
            );
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rms_style_config() {
        let text = "\
; RMS configuration
[System]
stationID: HR000K ; station code
latitude: +45.317 ; degrees +N
longitude: 13.567 ; degrees +E
elevation: 92.0

[Capture]
fps: 25.0
width: 1280
";
        let config = Config::parse_str(text);
        assert_eq!(config.station_id, "HR000K");
        assert_eq!(config.fps, 25.0);
        assert_eq!(config.latitude, 45.317);
        assert_eq!(config.longitude, 13.567);
        assert_eq!(config.elevation, 92.0);
    }

    #[test]
    fn test_parse_equals_delimiter() {
        let config = Config::parse_str("stationID = US0042\nfps = 30.0\n");
        assert_eq!(config.station_id, "US0042");
        assert_eq!(config.fps, 30.0);
    }

    #[test]
    fn test_malformed_values_keep_defaults() {
        let config = Config::parse_str("fps: fast\nlatitude: north\n");
        assert_eq!(config.fps, Config::default().fps);
        assert_eq!(config.latitude, Config::default().latitude);
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = load(Path::new("/nonexistent/night/dir"));
        assert_eq!(config, Config::default());
    }
}
