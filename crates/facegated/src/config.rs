use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address (default: 0.0.0.0:8000).
    pub bind: String,
    /// Root of the reference image tree (`<images>/<identity>/<file>`).
    pub images_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Embedding model identifier. The match threshold is calibrated for
    /// this model and must change with it.
    pub embed_model: String,
    /// L2 distance below which a nearest match verifies.
    pub match_threshold: f32,
    /// MQTT broker host.
    pub mqtt_host: String,
    /// MQTT broker port.
    pub mqtt_port: u16,
    /// Topic for verification results; `<topic>/status` carries presence.
    pub mqtt_topic: String,
    /// V4L2 device path. Unset runs the HTTP-only variant.
    pub camera_device: Option<String>,
    /// Seconds between poll ticks in continuous mode.
    pub poll_interval_secs: u64,
    /// Start continuous verification at boot (requires a camera).
    pub poll_autostart: bool,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Upper bound in seconds a caller waits on one embedding scan.
    pub verify_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            bind: std::env::var("FACEGATE_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            images_dir: std::env::var("FACEGATE_IMAGES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./images")),
            model_dir: std::env::var("FACEGATE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./models")),
            embed_model: std::env::var("FACEGATE_EMBED_MODEL")
                .unwrap_or_else(|_| "mobilefacenet".to_string()),
            match_threshold: env_f32("FACEGATE_MATCH_THRESHOLD", 0.7),
            mqtt_host: std::env::var("FACEGATE_MQTT_HOST")
                .unwrap_or_else(|_| "mqtt.eclipseprojects.io".to_string()),
            mqtt_port: env_u16("FACEGATE_MQTT_PORT", 1883),
            mqtt_topic: std::env::var("FACEGATE_MQTT_TOPIC")
                .unwrap_or_else(|_| "facegate/verification".to_string()),
            camera_device: std::env::var("FACEGATE_CAMERA_DEVICE")
                .ok()
                .filter(|v| !v.is_empty()),
            poll_interval_secs: env_u64("FACEGATE_POLL_INTERVAL_SECS", 2),
            poll_autostart: std::env::var("FACEGATE_POLL_AUTOSTART")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            warmup_frames: env_usize("FACEGATE_WARMUP_FRAMES", 4),
            verify_timeout_secs: env_u64("FACEGATE_VERIFY_TIMEOUT_SECS", 10),
        }
    }

    /// Path to the UltraFace detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("version-RFB-320.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the embedding model, named after the configured model id.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join(format!("{}.onnx", self.embed_model))
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
