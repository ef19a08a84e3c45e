use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// true: スキャン要求をクリアせず毎回推論する
    #[serde(default = "default_continuous")]
    pub continuous: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// これ未満の in_frame_likelihood のランドマークは捨てる
    #[serde(default)]
    pub min_likelihood: f32,
    /// true: 表示回転を推論器に渡して正立画像で推論する
    #[serde(default)]
    pub rotate_to_upright: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing のフィルタ (RUST_LOG があればそちらを優先)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// ログファイルの出力先ディレクトリ。None ならファイル出力なし
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// カメラ画像の解像度（センサー向き）
    #[serde(default = "default_image_width")]
    pub image_width: u32,
    #[serde(default = "default_image_height")]
    pub image_height: u32,
    /// 表示ビューの解像度
    #[serde(default = "default_view_width")]
    pub view_width: u32,
    #[serde(default = "default_view_height")]
    pub view_height: u32,
    /// センサー→表示の回転（度）
    #[serde(default = "default_display_rotation")]
    pub display_rotation: i32,
    /// 床からのカメラ高さ（メートル）
    #[serde(default = "default_camera_height")]
    pub camera_height: f32,
    /// カメラのピッチ（度、負で下向き）
    #[serde(default = "default_camera_pitch_deg")]
    pub camera_pitch_deg: f32,
    /// 垂直画角（度）
    #[serde(default = "default_fov_v_deg")]
    pub fov_v_deg: f32,
    /// 最初の N フレームはカメラ画像が NotYetAvailable
    #[serde(default = "default_image_ready_after")]
    pub image_ready_after: u32,
    /// 推論の擬似レイテンシ
    #[serde(default = "default_inference_latency_ms")]
    pub inference_latency_ms: u64,
    /// デモで回すフレーム数
    #[serde(default = "default_frames")]
    pub frames: u32,
}

fn default_continuous() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_image_width() -> u32 { 640 }
fn default_image_height() -> u32 { 480 }
fn default_view_width() -> u32 { 1080 }
fn default_view_height() -> u32 { 2160 }
fn default_display_rotation() -> i32 { 90 }
fn default_camera_height() -> f32 { 1.5 }
fn default_camera_pitch_deg() -> f32 { -30.0 }
fn default_fov_v_deg() -> f32 { 60.0 }
fn default_image_ready_after() -> u32 { 1 }
fn default_inference_latency_ms() -> u64 { 20 }
fn default_frames() -> u32 { 120 }

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            continuous: default_continuous(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            min_likelihood: 0.0,
            rotate_to_upright: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            image_width: default_image_width(),
            image_height: default_image_height(),
            view_width: default_view_width(),
            view_height: default_view_height(),
            display_rotation: default_display_rotation(),
            camera_height: default_camera_height(),
            camera_pitch_deg: default_camera_pitch_deg(),
            fov_v_deg: default_fov_v_deg(),
            image_ready_after: default_image_ready_after(),
            inference_latency_ms: default_inference_latency_ms(),
            frames: default_frames(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// ファイルが無ければデフォルト。パースエラーは返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.scan.continuous);
        assert_eq!(config.inference.min_likelihood, 0.0);
        assert!(!config.inference.rotate_to_upright);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.dir.is_none());
        assert_eq!(config.simulation.image_width, 640);
        assert_eq!(config.simulation.display_rotation, 90);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [scan]
            continuous = false

            [simulation]
            frames = 10
            "#,
        )
        .unwrap();
        assert!(!config.scan.continuous);
        assert_eq!(config.simulation.frames, 10);
        assert_eq!(config.simulation.view_height, 2160);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[inference]\nmin_likelihood = 0.5\n\n[logging]\ndir = \"logs\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.inference.min_likelihood, 0.5);
        assert_eq!(config.logging.dir.as_deref(), Some("logs"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("missing.toml")).unwrap();
        assert!(config.scan.continuous);
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scan\ncontinuous = ").unwrap();
        assert!(Config::load_or_default(file.path()).is_err());
    }
}
