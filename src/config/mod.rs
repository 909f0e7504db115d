//! Per-project configuration.
//!
//! A `.mlyn` file near the analyzed document declares include paths, extra
//! compiler flags, package dependencies, suffix mappings and the standard
//! library location. Flags the underlying compiler would accept but that
//! are irrelevant to analysis are recognized and ignored, so existing
//! build command lines keep working. Problems that do not make the file
//! unusable (a missing directory, an unknown flag) become notifications
//! attached to the response instead of failures.

use std::{error::Error, fmt::Display, path::{Path, PathBuf}};

use log::debug;
use serde::Serialize;

use crate::cache::FileCache;

/// File name looked up from the document's directory upwards.
pub const CONFIG_FILE_NAME: &str = ".mlyn";

/// Compiler flags accepted for command-line compatibility and ignored.
const IGNORED_FLAGS: &[&str] = &[
    "-w",
    "-warn-error",
    "-safe-string",
    "-strict-sequence",
    "-strict-formats",
    "-short-paths",
    "-principal",
    "-keep-locs",
    "-bin-annot",
    "-g",
    "-nostdlib",
    "-open",
];

/// Flags that carry an argument in the following word.
const FLAGS_WITH_ARGUMENT: &[&str] = &["-w", "-warn-error", "-open"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
    pub line: usize,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "configuration error: {} (line {})",
            self.message, self.line
        ))
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectConfig {
    pub path: PathBuf,
    pub source_dirs: Vec<PathBuf>,
    pub build_dirs: Vec<PathBuf>,
    pub flags: Vec<String>,
    pub packages: Vec<String>,
    pub suffixes: Vec<(String, String)>,
    pub stdlib: Option<PathBuf>,
}

impl ProjectConfig {
    /// Walk up from `document` looking for a configuration file.
    pub fn find_for(document: &Path) -> Option<PathBuf> {
        let mut dir = if document.is_dir() {
            Some(document)
        } else {
            document.parent()
        };
        while let Some(current) = dir {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            dir = current.parent();
        }
        None
    }

    /// Load and parse a configuration file through the file cache.
    ///
    /// Non-fatal problems are returned as notifications next to the
    /// config; an unreadable or unparseable file is an error and rejects
    /// requests for the buffer that needs it.
    pub fn load(path: &Path, cache: &FileCache) -> Result<(ProjectConfig, Vec<String>), ConfigError> {
        let content = cache.read(path).map_err(|error| ConfigError {
            message: format!("cannot read {}: {error}", path.display()),
            line: 0,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = ProjectConfig {
            path: path.to_path_buf(),
            ..ProjectConfig::default()
        };
        let mut notifications = vec![];

        for (index, raw_line) in content.lines().enumerate() {
            let line_number = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (directive, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let rest = rest.trim();

            match directive {
                "SRC" | "S" => {
                    config
                        .source_dirs
                        .push(resolve_dir(base, rest, &mut notifications))
                }
                "B" => {
                    config
                        .build_dirs
                        .push(resolve_dir(base, rest, &mut notifications))
                }
                "FLG" => parse_flags(rest, &mut config.flags, &mut notifications),
                "PKG" => config
                    .packages
                    .extend(rest.split_whitespace().map(str::to_string)),
                "SUFFIX" => {
                    let mut parts = rest.split_whitespace();
                    match (parts.next(), parts.next()) {
                        (Some(implementation), Some(interface)) => config
                            .suffixes
                            .push((implementation.to_string(), interface.to_string())),
                        _ => {
                            return Err(ConfigError {
                                message: "SUFFIX expects an implementation and an interface suffix"
                                    .to_string(),
                                line: line_number,
                            })
                        }
                    }
                }
                "STDLIB" => config.stdlib = Some(base.join(rest)),
                _ => {
                    return Err(ConfigError {
                        message: format!("unknown directive '{directive}'"),
                        line: line_number,
                    })
                }
            }
        }

        debug!(
            "loaded configuration {} ({} source dirs, {} packages)",
            path.display(),
            config.source_dirs.len(),
            config.packages.len()
        );
        Ok((config, notifications))
    }
}

fn resolve_dir(base: &Path, raw: &str, notifications: &mut Vec<String>) -> PathBuf {
    let dir = if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        base.join(raw)
    };
    if !dir.is_dir() {
        notifications.push(format!("cannot read directory {}", dir.display()));
    }
    dir
}

fn parse_flags(rest: &str, flags: &mut Vec<String>, notifications: &mut Vec<String>) {
    let mut words = rest.split_whitespace().peekable();
    while let Some(word) = words.next() {
        if IGNORED_FLAGS.contains(&word) {
            flags.push(word.to_string());
            if FLAGS_WITH_ARGUMENT.contains(&word) {
                if let Some(argument) = words.next() {
                    flags.push(argument.to_string());
                }
            }
        } else {
            notifications.push(format!("ignoring unknown flag '{word}'"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_project(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mlyn-config-test-{name}"));
        fs::create_dir_all(dir.join("lib")).unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_directives() {
        let path = temp_project("parse", "SRC lib\nFLG -w +a-4 -safe-string\nPKG base stdio\nSUFFIX .mly .mlyi\n");
        let cache = FileCache::default();

        let (config, notifications) = ProjectConfig::load(&path, &cache).unwrap();
        assert_eq!(config.source_dirs.len(), 1);
        assert!(config.source_dirs[0].ends_with("lib"));
        assert_eq!(config.flags, ["-w", "+a-4", "-safe-string"]);
        assert_eq!(config.packages, ["base", "stdio"]);
        assert_eq!(config.suffixes, [(".mly".to_string(), ".mlyi".to_string())]);
        assert!(notifications.is_empty());
    }

    #[test]
    fn test_unknown_flag_is_notification() {
        let path = temp_project("flags", "FLG -does-not-exist\n");
        let cache = FileCache::default();

        let (config, notifications) = ProjectConfig::load(&path, &cache).unwrap();
        assert!(config.flags.is_empty());
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].contains("-does-not-exist"));
    }

    #[test]
    fn test_missing_dir_is_notification() {
        let path = temp_project("dirs", "SRC does-not-exist\n");
        let cache = FileCache::default();

        let (_, notifications) = ProjectConfig::load(&path, &cache).unwrap();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].contains("does-not-exist"));
    }

    #[test]
    fn test_unknown_directive_is_error() {
        let path = temp_project("bad", "NOPE lib\n");
        let cache = FileCache::default();

        let error = ProjectConfig::load(&path, &cache).unwrap_err();
        assert_eq!(error.line, 1);
    }

    #[test]
    fn test_find_for_walks_up() {
        let path = temp_project("find", "SRC lib\n");
        let document = path.parent().unwrap().join("lib").join("main.mly");
        assert_eq!(ProjectConfig::find_for(&document), Some(path));
    }
}
