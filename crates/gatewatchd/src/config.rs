use crate::engine::EngineSettings;
use anyhow::{Context, Result};
use clap::Parser;
use gatewatch_core::MetricKind;
use gatewatch_hw::selector::DEFAULT_SCAN_LIMIT;
use gatewatch_hw::stream::MAX_MISSES;
use gatewatch_hw::{SelectionArgs, SourceStrategy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_MODEL_DIR: &str = "./models";
pub const GALLERY_FILE: &str = "embeddings.json";
pub const STUDENTS_FILE: &str = "estudiantes.csv";
pub const DEFAULT_RETRY: Duration = Duration::from_secs(2);

/// Command-line flags. These win over every other layer.
#[derive(Parser, Debug, Default)]
#[command(name = "gatewatchd", version, about = "Camera-driven access monitor")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Source selection strategy: auto, url or local
    #[arg(long)]
    pub source: Option<SourceStrategy>,

    /// Network camera URL (HTTP MJPEG or JPEG snapshot)
    #[arg(long)]
    pub url: Option<String>,

    /// Preferred local camera index
    #[arg(long)]
    pub cam: Option<u32>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub model_dir: Option<PathBuf>,

    /// Gallery embeddings JSON
    #[arg(long, value_name = "PATH")]
    pub gallery: Option<PathBuf>,

    /// Student directory CSV
    #[arg(long, value_name = "PATH")]
    pub students: Option<PathBuf>,

    /// TrueType font for overlay labels
    #[arg(long, value_name = "PATH")]
    pub font: Option<PathBuf>,
}

/// Optional TOML layer. Every key may be omitted.
#[derive(Deserialize, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub source: Option<SourceStrategy>,
    pub url: Option<String>,
    pub cam: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub verbose: Option<bool>,
    pub scan_limit: Option<u32>,
    pub data_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub gallery: Option<PathBuf>,
    pub students: Option<PathBuf>,
    pub font: Option<PathBuf>,
    pub cam_id: Option<String>,
    pub thresh: Option<f32>,
    pub margin: Option<f32>,
    pub eye_ar_thresh: Option<f32>,
    pub votes_window: Option<usize>,
    pub frame_skip: Option<u32>,
    pub downscale: Option<f32>,
    pub snapshot_cooldown_secs: Option<u64>,
    pub max_snapshots: Option<u32>,
    pub warmup_tries: Option<usize>,
    pub max_misses: Option<u32>,
    pub retry_secs: Option<u64>,
    pub distance: Option<MetricKind>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Fully resolved worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub selection: SelectionArgs,
    pub verbose: bool,
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
    pub gallery_path: PathBuf,
    /// May not exist; the directory is optional.
    pub students_path: PathBuf,
    /// Explicit label font. `None` searches the usual system locations.
    pub font_path: Option<PathBuf>,
    /// Overrides the selected source id in event rows.
    pub cam_id: Option<String>,
    pub metric: MetricKind,
    pub engine: EngineSettings,
    pub warmup_tries: usize,
    pub max_misses: u32,
    /// Pause between selection attempts while no source is available.
    pub retry: Duration,
    /// Ignored values, reported once logging is up.
    pub warnings: Vec<String>,
}

impl Config {
    /// Resolve all layers from the real process environment.
    pub fn load(cli: &Cli) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let file = match cli.config.clone().or_else(|| env("GATEWATCH_CONFIG").map(PathBuf::from)) {
            Some(path) => FileConfig::load(&path)?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(cli, file, env))
    }

    /// defaults < file < environment < CLI.
    pub fn resolve(cli: &Cli, file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut env = EnvLayer {
            lookup: env,
            warnings: Vec::new(),
        };

        let url = cli
            .url
            .clone()
            .or_else(|| env.string("GATEWATCH_CAM_URL"))
            .or_else(|| env.string("CAM_URL"))
            .or(file.url)
            .filter(|u| !u.trim().is_empty());

        let preferred_indices = cli
            .cam
            .or_else(|| env.parse("GATEWATCH_CAM_INDEX"))
            .or(file.cam)
            .into_iter()
            .collect();

        let defaults = SelectionArgs::default();
        let selection = SelectionArgs {
            strategy: cli
                .source
                .or_else(|| env.parse("GATEWATCH_SOURCE"))
                .or(file.source)
                .unwrap_or(defaults.strategy),
            url,
            preferred_indices,
            preferred_width: cli
                .width
                .or_else(|| env.parse("GATEWATCH_WIDTH"))
                .or(file.width)
                .unwrap_or(defaults.preferred_width),
            preferred_height: cli
                .height
                .or_else(|| env.parse("GATEWATCH_HEIGHT"))
                .or(file.height)
                .unwrap_or(defaults.preferred_height),
            scan_limit: env
                .parse("GATEWATCH_SCAN_LIMIT")
                .or(file.scan_limit)
                .unwrap_or(DEFAULT_SCAN_LIMIT),
        };

        let verbose = cli.verbose || env.flag("GATEWATCH_VERBOSE").or(file.verbose).unwrap_or(false);

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| env.path("GATEWATCH_DATA_DIR"))
            .or(file.data_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let model_dir = cli
            .model_dir
            .clone()
            .or_else(|| env.path("GATEWATCH_MODEL_DIR"))
            .or(file.model_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR));
        let gallery_path = cli
            .gallery
            .clone()
            .or_else(|| env.path("GATEWATCH_GALLERY"))
            .or(file.gallery)
            .unwrap_or_else(|| model_dir.join(GALLERY_FILE));
        let students_path = cli
            .students
            .clone()
            .or_else(|| env.path("GATEWATCH_STUDENTS"))
            .or(file.students)
            .unwrap_or_else(|| data_dir.join(STUDENTS_FILE));
        let font_path = cli.font.clone().or_else(|| env.path("GATEWATCH_FONT")).or(file.font);

        let d = EngineSettings::default();
        let mut engine = EngineSettings {
            threshold: env.parse("GATEWATCH_THRESH").or(file.thresh).unwrap_or(d.threshold),
            margin: env.parse("GATEWATCH_MARGIN").or(file.margin).unwrap_or(d.margin),
            eye_ar_thresh: env
                .parse("GATEWATCH_EYE_AR_THRESH")
                .or(file.eye_ar_thresh)
                .unwrap_or(d.eye_ar_thresh),
            votes_window: env
                .parse("GATEWATCH_VOTES_WINDOW")
                .or(file.votes_window)
                .unwrap_or(d.votes_window),
            frame_skip: env.parse("GATEWATCH_FRAME_SKIP").or(file.frame_skip).unwrap_or(d.frame_skip),
            downscale: env.parse("GATEWATCH_DOWNSCALE").or(file.downscale).unwrap_or(d.downscale),
            snapshot_cooldown: env
                .parse("GATEWATCH_SNAPSHOT_COOLDOWN_SECS")
                .or(file.snapshot_cooldown_secs)
                .map(Duration::from_secs)
                .unwrap_or(d.snapshot_cooldown),
            max_snapshots: env
                .parse("GATEWATCH_MAX_SNAPSHOTS")
                .or(file.max_snapshots)
                .unwrap_or(d.max_snapshots),
        };
        if !(engine.downscale > 0.0 && engine.downscale <= 1.0) {
            env.warnings
                .push(format!("downscale {} outside (0, 1]; using {}", engine.downscale, d.downscale));
            engine.downscale = d.downscale;
        }
        if engine.votes_window == 0 {
            env.warnings.push("votes window must be at least 1; using 1".to_string());
            engine.votes_window = 1;
        }

        Self {
            selection,
            verbose,
            cam_id: env
                .string("GATEWATCH_CAM_ID")
                .or(file.cam_id)
                .filter(|id| !id.trim().is_empty()),
            metric: env.parse("GATEWATCH_DISTANCE").or(file.distance).unwrap_or_default(),
            engine,
            warmup_tries: env
                .parse("GATEWATCH_WARMUP_TRIES")
                .or(file.warmup_tries)
                .unwrap_or(gatewatch_hw::opener::WARMUP_TRIES),
            max_misses: env.parse("GATEWATCH_MAX_MISSES").or(file.max_misses).unwrap_or(MAX_MISSES),
            retry: env
                .parse("GATEWATCH_RETRY_SECS")
                .or(file.retry_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY),
            warnings: env.warnings,
            data_dir,
            model_dir,
            gallery_path,
            students_path,
            font_path,
        }
    }
}

/// Environment lookups that remember what they had to ignore.
struct EnvLayer<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> EnvLayer<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    fn parse<T: FromStr>(&mut self, key: &str) -> Option<T> {
        let raw = self.string(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.warnings.push(format!("ignoring {key}={raw:?}: not a valid value"));
                None
            }
        }
    }

    fn flag(&mut self, key: &str) -> Option<bool> {
        let raw = self.string(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                self.warnings.push(format!("ignoring {key}={raw:?}: expected a boolean"));
                None
            }
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(&Cli::default(), FileConfig::default(), env(&[]));
        assert_eq!(config.selection, SelectionArgs::default());
        assert!(!config.verbose);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.gallery_path, PathBuf::from("./models/embeddings.json"));
        assert_eq!(config.students_path, PathBuf::from("./data/estudiantes.csv"));
        assert_eq!(config.engine, EngineSettings::default());
        assert_eq!(config.metric, MetricKind::Euclidean);
        assert_eq!(config.warmup_tries, 12);
        assert_eq!(config.max_misses, 15);
        assert_eq!(config.retry, Duration::from_secs(2));
        assert!(config.cam_id.is_none());
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn test_precedence_cli_over_env_over_file() {
        let file: FileConfig = toml::from_str(
            r#"
            source = "local"
            width = 800
            height = 600
            thresh = 0.45
            frame_skip = 0
            "#,
        )
        .unwrap();
        let cli = Cli {
            width: Some(1920),
            ..Cli::default()
        };
        let config = Config::resolve(
            &cli,
            file,
            env(&[("GATEWATCH_WIDTH", "1024"), ("GATEWATCH_SOURCE", "url"), ("GATEWATCH_HEIGHT", "768")]),
        );
        assert_eq!(config.selection.preferred_width, 1920);
        assert_eq!(config.selection.preferred_height, 768);
        assert_eq!(config.selection.strategy, SourceStrategy::Url);
        assert_eq!(config.engine.threshold, 0.45);
        assert_eq!(config.engine.frame_skip, 0);
    }

    #[test]
    fn test_cam_url_fallback_and_blank_url() {
        let config = Config::resolve(
            &Cli::default(),
            FileConfig::default(),
            env(&[("CAM_URL", "http://cam.local/video")]),
        );
        assert_eq!(config.selection.url.as_deref(), Some("http://cam.local/video"));

        let config = Config::resolve(
            &Cli::default(),
            FileConfig::default(),
            env(&[("GATEWATCH_CAM_URL", "http://a/"), ("CAM_URL", "http://b/")]),
        );
        assert_eq!(config.selection.url.as_deref(), Some("http://a/"));

        let cli = Cli {
            url: Some("   ".into()),
            ..Cli::default()
        };
        let config = Config::resolve(&cli, FileConfig::default(), env(&[]));
        assert!(config.selection.url.is_none());
    }

    #[test]
    fn test_paths_follow_dirs() {
        let cli = Cli {
            model_dir: Some("/opt/models".into()),
            ..Cli::default()
        };
        let config = Config::resolve(&cli, FileConfig::default(), env(&[("GATEWATCH_DATA_DIR", "/var/gw")]));
        assert_eq!(config.gallery_path, PathBuf::from("/opt/models/embeddings.json"));
        assert_eq!(config.students_path, PathBuf::from("/var/gw/estudiantes.csv"));
    }

    #[test]
    fn test_font_path_layers() {
        let config = Config::resolve(&Cli::default(), FileConfig::default(), env(&[]));
        assert!(config.font_path.is_none());

        let file: FileConfig = toml::from_str(r#"font = "/etc/gw/label.ttf""#).unwrap();
        let config = Config::resolve(
            &Cli::default(),
            file,
            env(&[("GATEWATCH_FONT", "/usr/share/fonts/gw.ttf")]),
        );
        assert_eq!(config.font_path, Some(PathBuf::from("/usr/share/fonts/gw.ttf")));
    }

    #[test]
    fn test_invalid_env_values_warn_and_fall_back() {
        let config = Config::resolve(
            &Cli::default(),
            FileConfig::default(),
            env(&[
                ("GATEWATCH_THRESH", "lots"),
                ("GATEWATCH_SOURCE", "webcam"),
                ("GATEWATCH_VERBOSE", "maybe"),
                ("GATEWATCH_DOWNSCALE", "2.0"),
            ]),
        );
        assert_eq!(config.engine.threshold, 0.50);
        assert_eq!(config.selection.strategy, SourceStrategy::Auto);
        assert!(!config.verbose);
        assert_eq!(config.engine.downscale, 0.5);
        assert_eq!(config.warnings.len(), 4);
    }

    #[test]
    fn test_env_tuning() {
        let config = Config::resolve(
            &Cli::default(),
            FileConfig::default(),
            env(&[
                ("GATEWATCH_VERBOSE", "1"),
                ("GATEWATCH_CAM_INDEX", "2"),
                ("GATEWATCH_CAM_ID", "gate-north"),
                ("GATEWATCH_DISTANCE", "cosine"),
                ("GATEWATCH_SNAPSHOT_COOLDOWN_SECS", "30"),
                ("GATEWATCH_RETRY_SECS", "5"),
            ]),
        );
        assert!(config.verbose);
        assert_eq!(config.selection.preferred_indices, vec![2]);
        assert_eq!(config.cam_id.as_deref(), Some("gate-north"));
        assert_eq!(config.metric, MetricKind::Cosine);
        assert_eq!(config.engine.snapshot_cooldown, Duration::from_secs(30));
        assert_eq!(config.retry, Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("camera = 3").is_err());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from(["gatewatchd", "--source", "local", "--cam", "1", "-v"]);
        assert_eq!(cli.source, Some(SourceStrategy::Local));
        assert_eq!(cli.cam, Some(1));
        assert!(cli.verbose);
    }
}
