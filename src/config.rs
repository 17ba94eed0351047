use std::collections::HashMap;
use thiserror::Error;

/// Process configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub jwt_secret: String,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_api_url: String,
    pub geocoder: Option<GeocoderConfig>,
    pub masking: MaskingConfig,
    pub sweep_interval_secs: u64,
    pub timezone: String,
    pub fallback_customer_lat: f64,
    pub fallback_customer_lng: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocoderConfig {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskingConfig {
    pub api_url: String,
    pub api_token: String,
    pub caller_ids: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// The sweeper never runs more often than this.
pub const MIN_SWEEP_INTERVAL_SECS: u64 = 300;

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = required(&env_map, "DATABASE_PATH")?;
        let jwt_secret = required(&env_map, "JWT_SECRET")?;
        let razorpay_key_id = required(&env_map, "RAZORPAY_KEY_ID")?;
        let razorpay_key_secret = required(&env_map, "RAZORPAY_KEY_SECRET")?;
        let razorpay_api_url = env_map
            .get("RAZORPAY_API_URL")
            .cloned()
            .unwrap_or_else(|| "https://api.razorpay.com/v1".to_string());

        let geocoder = match (env_map.get("GEOCODER_API_URL"), env_map.get("GEOCODER_API_KEY")) {
            (Some(url), Some(key)) if !key.trim().is_empty() => Some(GeocoderConfig {
                api_url: url.clone(),
                api_key: key.clone(),
            }),
            (None, Some(key)) if !key.trim().is_empty() => Some(GeocoderConfig {
                api_url: "https://maps.googleapis.com/maps/api/geocode/json".to_string(),
                api_key: key.clone(),
            }),
            _ => None,
        };

        let masking = MaskingConfig {
            api_url: env_map
                .get("MASKING_API_URL")
                .cloned()
                .unwrap_or_else(|| "https://api.exotel.com/v1".to_string()),
            api_token: env_map.get("MASKING_API_TOKEN").cloned().unwrap_or_default(),
            caller_ids: env_map
                .get("MASKING_CALLER_IDS")
                .map(|s| {
                    s.split(',')
                        .map(|id| id.trim().to_string())
                        .filter(|id| !id.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        let sweep_interval_secs = env_map
            .get("SWEEP_INTERVAL_SECS")
            .map(|s| s.as_str())
            .unwrap_or("300")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "SWEEP_INTERVAL_SECS".to_string(),
                    "must be a whole number of seconds".to_string(),
                )
            })?
            .max(MIN_SWEEP_INTERVAL_SECS);

        let timezone = env_map
            .get("TIMEZONE")
            .cloned()
            .unwrap_or_else(|| "Asia/Kolkata".to_string());

        let fallback_customer_lat = parse_f64(&env_map, "FALLBACK_CUSTOMER_LAT", 26.7271)?;
        let fallback_customer_lng = parse_f64(&env_map, "FALLBACK_CUSTOMER_LNG", 88.3953)?;
        if !(-90.0..=90.0).contains(&fallback_customer_lat) {
            return Err(ConfigError::InvalidValue(
                "FALLBACK_CUSTOMER_LAT".to_string(),
                "must be within [-90, 90]".to_string(),
            ));
        }
        if !(-180.0..=180.0).contains(&fallback_customer_lng) {
            return Err(ConfigError::InvalidValue(
                "FALLBACK_CUSTOMER_LNG".to_string(),
                "must be within [-180, 180]".to_string(),
            ));
        }

        Ok(Config {
            port,
            database_path,
            jwt_secret,
            razorpay_key_id,
            razorpay_key_secret,
            razorpay_api_url,
            geocoder,
            masking,
            sweep_interval_secs,
            timezone,
            fallback_customer_lat,
            fallback_customer_lng,
        })
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_f64(env_map: &HashMap<String, String>, key: &str, default: f64) -> Result<f64, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<f64>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a decimal number".to_string())
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map.insert("JWT_SECRET".to_string(), "secret".to_string());
        map.insert("RAZORPAY_KEY_ID".to_string(), "rzp_test_key".to_string());
        map.insert("RAZORPAY_KEY_SECRET".to_string(), "rzp_secret".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.timezone, "Asia/Kolkata");
        assert!(config.geocoder.is_none());
        assert!(config.masking.caller_ids.is_empty());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_blank_jwt_secret_is_missing() {
        let mut env_map = setup_required_env();
        env_map.insert("JWT_SECRET".to_string(), "  ".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "JWT_SECRET"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_razorpay_secret() {
        let mut env_map = setup_required_env();
        env_map.remove("RAZORPAY_KEY_SECRET");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "RAZORPAY_KEY_SECRET"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_sweep_interval_is_clamped() {
        let mut env_map = setup_required_env();
        env_map.insert("SWEEP_INTERVAL_SECS".to_string(), "10".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.sweep_interval_secs, MIN_SWEEP_INTERVAL_SECS);
    }

    #[test]
    fn test_caller_id_pool_parsing() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "MASKING_CALLER_IDS".to_string(),
            "08047112233, ,08047112244".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.masking.caller_ids, vec!["08047112233", "08047112244"]);
    }

    #[test]
    fn test_geocoder_enabled_by_key() {
        let mut env_map = setup_required_env();
        env_map.insert("GEOCODER_API_KEY".to_string(), "abc".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.geocoder.unwrap().api_key, "abc");
    }

    #[test]
    fn test_invalid_fallback_latitude() {
        let mut env_map = setup_required_env();
        env_map.insert("FALLBACK_CUSTOMER_LAT".to_string(), "123".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "FALLBACK_CUSTOMER_LAT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
