use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// Telephony media is mu-law at this rate end-to-end.
pub const MEDIA_SAMPLE_RATE: u32 = 8000;

// Deadlines for external calls.
pub const SESSION_STORE_DEADLINE_MS: u64 = 2_000;
pub const CALENDAR_DEADLINE_SECS: u64 = 8;

// Session store TTLs (seconds).
pub const SESSION_TTL_SECS: u64 = 3_600;
pub const CUSTOMER_CACHE_TTL_SECS: u64 = 300;
pub const VIN_CACHE_TTL_SECS: u64 = 604_800;

/// Top-level config (revline.toml + REVLINE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevlineConfig {
    pub gateway: GatewayConfig,
    pub telephony: TelephonyConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub vin: VinConfig,
    #[serde(default)]
    pub business_hours: BusinessHoursConfig,
    #[serde(default)]
    pub dealership: DealershipConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Telephony provider credentials and call policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Public base URL the provider calls back into (TwiML + media stream).
    pub bootstrap_url: String,
    /// Number outbound calls originate from.
    pub from_number: String,
    /// POC safety rail: outbound dialing refuses any other destination.
    pub outbound_test_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    pub api_key: String,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default = "default_mulaw")]
    pub encoding: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default = "bool_true")]
    pub interim_results: bool,
    #[serde(default = "bool_true")]
    pub smart_format: bool,
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u32,
    #[serde(default = "default_utterance_end_ms")]
    pub utterance_end_ms: u32,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub api_key: String,
    #[serde(default = "default_tts_model")]
    pub model: String,
    #[serde(default = "default_mulaw")]
    pub encoding: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_store_pool")]
    pub pool_size: u32,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            pool_size: default_store_pool(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    /// IANA timezone of the dealership; converted to/from UTC at the
    /// calendar and business-hours boundary only.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VinConfig {
    #[serde(default = "default_vin_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_vin_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VinConfig {
    fn default() -> Self {
        Self {
            endpoint: default_vin_endpoint(),
            timeout_secs: default_vin_timeout_secs(),
        }
    }
}

/// Shop hours, in the dealership's local timezone.
/// Mon-Fri weekday window, Saturday window, Sunday closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursConfig {
    #[serde(default = "default_weekday_open")]
    pub weekday_open: u32,
    #[serde(default = "default_weekday_close")]
    pub weekday_close: u32,
    #[serde(default = "default_saturday_open")]
    pub saturday_open: u32,
    #[serde(default = "default_saturday_close")]
    pub saturday_close: u32,
    #[serde(default = "default_lunch_start")]
    pub lunch_start: u32,
    #[serde(default = "default_lunch_end")]
    pub lunch_end: u32,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            weekday_open: default_weekday_open(),
            weekday_close: default_weekday_close(),
            saturday_open: default_saturday_open(),
            saturday_close: default_saturday_close(),
            lunch_start: default_lunch_start(),
            lunch_end: default_lunch_end(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealershipConfig {
    #[serde(default = "default_dealership_name")]
    pub name: String,
    /// Minimum trimmed interim-transcript length that triggers barge-in.
    #[serde(default = "default_barge_in_min_chars")]
    pub barge_in_min_chars: usize,
}

impl Default for DealershipConfig {
    fn default() -> Self {
        Self {
            name: default_dealership_name(),
            barge_in_min_chars: default_barge_in_min_chars(),
        }
    }
}

fn default_port() -> u16 {
    8321
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_stt_model() -> String {
    "nova-2-phonecall".to_string()
}
fn default_tts_model() -> String {
    "aura-asteria-en".to_string()
}
fn default_mulaw() -> String {
    "mulaw".to_string()
}
fn default_sample_rate() -> u32 {
    MEDIA_SAMPLE_RATE
}
fn default_channels() -> u32 {
    1
}
fn default_endpointing_ms() -> u32 {
    300
}
fn default_utterance_end_ms() -> u32 {
    1000
}
fn default_keepalive_secs() -> u64 {
    10
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_store_pool() -> u32 {
    50
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.revline/revline.db")
}
fn default_calendar_id() -> String {
    "primary".to_string()
}
fn default_timezone() -> String {
    "America/New_York".to_string()
}
fn default_vin_endpoint() -> String {
    "https://vpic.nhtsa.dot.gov/api/vehicles/DecodeVinValues".to_string()
}
fn default_vin_timeout_secs() -> u64 {
    5
}
fn default_weekday_open() -> u32 {
    9
}
fn default_weekday_close() -> u32 {
    17
}
fn default_saturday_open() -> u32 {
    9
}
fn default_saturday_close() -> u32 {
    15
}
fn default_lunch_start() -> u32 {
    12
}
fn default_lunch_end() -> u32 {
    13
}
fn default_dealership_name() -> String {
    "Revline Motors".to_string()
}
fn default_barge_in_min_chars() -> usize {
    1
}
fn bool_true() -> bool {
    true
}

impl RevlineConfig {
    /// Load config from a TOML file with REVLINE_* env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RevlineConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("REVLINE_").split("_"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configs that would only fail at call time.
    pub fn validate(&self) -> Result<()> {
        if self.business_hours.weekday_open >= self.business_hours.weekday_close {
            return Err(CoreError::Config(
                "business_hours: weekday_open must be before weekday_close".into(),
            ));
        }
        if self.business_hours.saturday_open >= self.business_hours.saturday_close {
            return Err(CoreError::Config(
                "business_hours: saturday_open must be before saturday_close".into(),
            ));
        }
        if self.business_hours.lunch_start >= self.business_hours.lunch_end {
            return Err(CoreError::Config(
                "business_hours: lunch_start must be before lunch_end".into(),
            ));
        }
        if self.telephony.outbound_test_number.is_empty() {
            return Err(CoreError::Config(
                "telephony: outbound_test_number must be set".into(),
            ));
        }
        // Full IANA validation happens where chrono-tz is linked (the
        // calendar/slot code); core only rejects the obviously broken case.
        if self.calendar.timezone.is_empty() {
            return Err(CoreError::Config("calendar: timezone must be set".into()));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.revline/revline.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [gateway]
            port = 9000

            [telephony]
            account_sid = "AC_test"
            auth_token = "secret"
            bootstrap_url = "https://example.test"
            from_number = "+15550001111"
            outbound_test_number = "+15552223333"

            [stt]
            api_key = "dg_test"

            [tts]
            api_key = "dg_test"

            [llm]
            api_key = "sk_test"

            [calendar]
            client_id = "cid"
            client_secret = "csecret"
            refresh_token = "rtok"
        "#
    }

    fn load_from_str(toml: &str) -> Result<RevlineConfig> {
        let config: RevlineConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = load_from_str(minimal_toml()).unwrap();
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.stt.sample_rate, 8000);
        assert_eq!(cfg.stt.endpointing_ms, 300);
        assert_eq!(cfg.tts.encoding, "mulaw");
        assert!((cfg.llm.temperature - 0.8).abs() < f32::EPSILON);
        assert_eq!(cfg.llm.max_tokens, 1000);
        assert_eq!(cfg.session_store.pool_size, 50);
        assert_eq!(cfg.business_hours.saturday_close, 15);
        assert_eq!(cfg.dealership.barge_in_min_chars, 1);
    }

    #[test]
    fn inverted_hours_rejected() {
        let toml = format!(
            "{}\n[business_hours]\nweekday_open = 18\nweekday_close = 9\n",
            minimal_toml()
        );
        assert!(load_from_str(&toml).is_err());
    }
}
