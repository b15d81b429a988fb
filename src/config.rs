use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::encode::writer::WriterKind;
use crate::foundation::core::Rgba8;
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::render::backend::RenderSettings;

/// Environment variable that overrides [`CaptureConfig::output_dir`].
pub const OUTPUT_DIR_ENV: &str = "SCENECAP_OUTPUT_DIR";

const MAX_FPS: u32 = 240;
const MAX_VIEW_DIM: u32 = 8192;
const X264_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Recording configuration, read from JSON. Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Directory holding the well-known recording.
    pub output_dir: PathBuf,
    pub file_name: String,
    pub target_fps: u32,
    /// Initial view bounds; hosts update them with `set_view_size`.
    pub view_width: u32,
    pub view_height: u32,
    pub writer: WriterKind,
    /// Scene clear color, also used to flatten alpha before encoding.
    pub background_rgba: Rgba8,
    pub x264_preset: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_name: "recording.mp4".to_string(),
            target_fps: 60,
            view_width: 1280,
            view_height: 720,
            writer: WriterKind::Ffmpeg,
            background_rgba: Rgba8::new(0, 0, 0, 255),
            x264_preset: "veryfast".to_string(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "scenecap", "scenecap")
}

fn default_output_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("scenecap-output"))
}

impl CaptureConfig {
    /// Per-user config file location, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|p| p.config_dir().join("config.json"))
    }

    pub fn from_json_str(s: &str) -> CaptureResult<Self> {
        let cfg: Self =
            serde_json::from_str(s).map_err(|e| CaptureError::config(format!("invalid JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> CaptureResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::config(format!("read config '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// `path` if given, else the per-user file when it exists, else defaults. Environment
    /// overrides are applied last.
    pub fn resolve(path: Option<&Path>) -> CaptureResult<Self> {
        let cfg = match path {
            Some(p) => Self::load(p)?,
            None => match Self::default_path() {
                Some(p) if p.is_file() => Self::load(p)?,
                _ => Self::default(),
            },
        };
        let cfg = cfg.with_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os(OUTPUT_DIR_ENV)
            && !dir.is_empty()
        {
            self.output_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn save(&self, path: impl AsRef<Path>) -> CaptureResult<()> {
        use anyhow::Context as _;

        self.validate()?;
        let path = path.as_ref();
        crate::encode::writer::ensure_parent_dir(path)?;
        let json = serde_json::to_string_pretty(self).context("serialize config")?;
        std::fs::write(path, json).with_context(|| format!("write config '{}'", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.target_fps == 0 || self.target_fps > MAX_FPS {
            return Err(CaptureError::config(format!(
                "target_fps must be between 1 and {MAX_FPS}"
            )));
        }
        if self.view_width > MAX_VIEW_DIM || self.view_height > MAX_VIEW_DIM {
            return Err(CaptureError::config(format!(
                "view size must be at most {MAX_VIEW_DIM}x{MAX_VIEW_DIM}"
            )));
        }
        let name = Path::new(&self.file_name);
        if self.file_name.is_empty()
            || name.components().count() != 1
            || name.file_name().is_none()
        {
            return Err(CaptureError::config(format!(
                "file_name must be a plain file name, got '{}'",
                self.file_name
            )));
        }
        if !X264_PRESETS.contains(&self.x264_preset.as_str()) {
            return Err(CaptureError::config(format!(
                "unknown x264_preset '{}'",
                self.x264_preset
            )));
        }
        Ok(())
    }

    /// The well-known recording path.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            clear_rgba: Some(self.background_rgba.to_array()),
        }
    }
}
