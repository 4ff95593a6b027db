use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// All tunables, resolved once at startup. Components receive this by
/// reference and never read the environment themselves.
#[derive(Debug, Clone)]
pub struct Config {
    // Audio
    pub capture_rate: u32,
    pub playback_rate: u32,
    pub frame_samples: usize,
    pub input_device: Option<String>,
    pub output_device: Option<String>,

    // Mouth mapping
    pub mouth_min_open: f32,
    pub mouth_intensity_min: f32,
    pub mouth_intensity_max: f32,
    pub mouth_duration_min: Duration,
    pub mouth_duration_max: Duration,
    /// Exponent applied to the normalized opening before the throttle /
    /// duration interpolation. 1.0 = linear.
    pub mouth_curve: f32,

    // Torso motion
    pub torso_forward: f32,
    pub torso_back: f32,
    pub torso_forward_hold: Duration,
    pub torso_back_hold: Duration,
    pub torso_cadence: Duration,
    pub idle_wag_interval: Duration,
    pub idle_wag_throttle: f32,
    pub idle_wag_hold: Duration,

    // Motor wiring
    pub mouth_channel: u8,
    pub torso_channel: u8,
    pub mouth_invert: bool,
    pub torso_invert: bool,
    pub motor_timeout: Duration,
    pub motor_device: Option<PathBuf>,

    // Session
    pub idle_timeout: Duration,
    pub greeting_cue: Option<PathBuf>,
    pub farewell_cue: Option<PathBuf>,

    // Remote endpoint
    pub endpoint_url: String,
    pub auth_token: Option<String>,
    pub voice_id: String,
    pub system_prompt: String,

    // Queues and retries
    pub send_queue: usize,
    pub event_queue: usize,
    pub reconnect_attempts: u32,
    pub reconnect_backoff: Duration,

    /// Run with logging stubs when hardware is missing instead of failing.
    pub demo_mode: bool,
}

fn var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn var_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn var_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(var(key, default_ms))
}

const DEFAULT_PROMPT: &str = "You are a talking fish mounted on a wall. \
You're helpful and conversational, but keep responses brief - one or two \
sentences max. Be natural and friendly.";

impl Config {
    pub fn from_env() -> Self {
        // Direction flags use the firmware convention: -1 inverts.
        let mouth_dir: i8 = var("MOUTH_DIR", 1);
        let torso_dir: i8 = var("TORSO_DIR", 1);

        Self {
            capture_rate: var("CAPTURE_RATE", 16_000),
            playback_rate: var("PLAYBACK_RATE", 24_000),
            frame_samples: var("FRAME_SAMPLES", 1024),
            input_device: var_opt("AUDIO_INPUT_DEVICE"),
            output_device: var_opt("AUDIO_OUTPUT_DEVICE"),

            mouth_min_open: var("MOUTH_MIN_OPEN_PCT", 12.0) / 100.0,
            mouth_intensity_min: var("MOUTH_INTENSITY_MIN", 0.2),
            mouth_intensity_max: var("MOUTH_INTENSITY_MAX", 0.9),
            mouth_duration_min: var_ms("MOUTH_DURATION_MIN_MS", 25),
            mouth_duration_max: var_ms("MOUTH_DURATION_MAX_MS", 80),
            mouth_curve: var("MOUTH_CURVE", 1.0),

            torso_forward: var("TORSO_THROTTLE_FWD", 0.55),
            torso_back: var("TORSO_THROTTLE_BACK", -0.55),
            torso_forward_hold: var_ms("TORSO_FWD_MS", 1200),
            torso_back_hold: var_ms("TORSO_BACK_MS", 450),
            torso_cadence: var_ms("TORSO_CADENCE_MS", 2500),
            idle_wag_interval: var_ms("IDLE_WAG_MS", 3000),
            idle_wag_throttle: var("IDLE_WAG_THROTTLE", 0.3),
            idle_wag_hold: var_ms("IDLE_WAG_HOLD_MS", 150),

            mouth_channel: var("MOUTH_MOTOR", 2),
            torso_channel: var("TORSO_MOTOR", 1),
            mouth_invert: mouth_dir < 0,
            torso_invert: torso_dir < 0,
            motor_timeout: var_ms("MOTOR_TIMEOUT_MS", 50),
            motor_device: var_opt("MOTOR_DEVICE").map(PathBuf::from),

            idle_timeout: Duration::from_secs(var("IDLE_TIMEOUT_SECS", 30)),
            greeting_cue: var_opt("GREETING_CUE").map(PathBuf::from),
            farewell_cue: var_opt("FAREWELL_CUE").map(PathBuf::from),

            endpoint_url: var_opt("VOICE_ENDPOINT_URL")
                .unwrap_or_else(|| "wss://localhost:8443/voice".to_string()),
            auth_token: var_opt("VOICE_ENDPOINT_TOKEN"),
            voice_id: var_opt("VOICE_ID").unwrap_or_else(|| "matthew".to_string()),
            system_prompt: var_opt("SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_PROMPT.to_string()),

            send_queue: var("SEND_QUEUE", 64),
            event_queue: var("EVENT_QUEUE", 64),
            reconnect_attempts: var("RECONNECT_ATTEMPTS", 1),
            reconnect_backoff: var_ms("RECONNECT_BACKOFF_MS", 500),

            demo_mode: var("DEMO_MODE", 0u8) != 0,
        }
    }
}

impl Default for Config {
    /// Fixed baseline, independent of the environment. Used by tests.
    fn default() -> Self {
        Self {
            capture_rate: 16_000,
            playback_rate: 24_000,
            frame_samples: 1024,
            input_device: None,
            output_device: None,

            mouth_min_open: 0.12,
            mouth_intensity_min: 0.2,
            mouth_intensity_max: 0.9,
            mouth_duration_min: Duration::from_millis(25),
            mouth_duration_max: Duration::from_millis(80),
            mouth_curve: 1.0,

            torso_forward: 0.55,
            torso_back: -0.55,
            torso_forward_hold: Duration::from_millis(1200),
            torso_back_hold: Duration::from_millis(450),
            torso_cadence: Duration::from_millis(2500),
            idle_wag_interval: Duration::from_millis(3000),
            idle_wag_throttle: 0.3,
            idle_wag_hold: Duration::from_millis(150),

            mouth_channel: 2,
            torso_channel: 1,
            mouth_invert: false,
            torso_invert: false,
            motor_timeout: Duration::from_millis(50),
            motor_device: None,

            idle_timeout: Duration::from_secs(30),
            greeting_cue: None,
            farewell_cue: None,

            endpoint_url: "wss://localhost:8443/voice".to_string(),
            auth_token: None,
            voice_id: "matthew".to_string(),
            system_prompt: DEFAULT_PROMPT.to_string(),

            send_queue: 64,
            event_queue: 64,
            reconnect_attempts: 1,
            reconnect_backoff: Duration::from_millis(500),

            demo_mode: true,
        }
    }
}
