use serde::Deserialize;

/// Live voice session configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceConfig {
    /// Model used for voice turns, as `"<provider>/<model>"`
    pub model: String,
    /// System prompt for voice turns
    #[serde(default)]
    pub system: Option<String>,
    /// Voice identifier passed to the speech synthesizer
    #[serde(default)]
    pub voice: Option<String>,
    /// Output audio encoding requested from the speech synthesizer
    #[serde(default = "default_format")]
    pub format: String,
    /// Output sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Length at which unterminated text is flushed to the synthesizer
    #[serde(default = "default_max_segment_chars")]
    pub max_segment_chars: usize,
}

fn default_format() -> String {
    "pcm".to_string()
}

const fn default_sample_rate() -> u32 {
    24_000
}

const fn default_max_segment_chars() -> usize {
    200
}
