use chrono::Duration;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::entities::Coordinates;
use crate::error::{config_error, Error};
use crate::geo::ServiceArea;

/// Rules the engine applies; everything here is a tunable, not a protocol constant.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub completion_radius_meters: f64,
    pub pickup_radius_meters: Option<f64>,
    pub pending_timeout: Duration,
    pub max_search_radius_km: f64,
    pub service_area: Option<ServiceArea>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            completion_radius_meters: 300.0,
            pickup_radius_meters: None,
            pending_timeout: Duration::minutes(30),
            max_search_radius_km: 25.0,
            service_area: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub sweep_interval: std::time::Duration,
    pub sweep_workers: usize,
    pub identity_tokens_file: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Config {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self, Error> {
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();

        let service_area = match (
            parse::<f64, _>(&lookup, "SERVICE_AREA_LAT")?,
            parse::<f64, _>(&lookup, "SERVICE_AREA_LNG")?,
            parse::<f64, _>(&lookup, "SERVICE_AREA_RADIUS_KM")?,
        ) {
            (Some(lat), Some(lng), Some(radius_km)) => {
                positive("SERVICE_AREA_RADIUS_KM", radius_km)?;

                let center = Coordinates::new(lat, lng);
                center
                    .validate()
                    .map_err(|err| config_error(format!("SERVICE_AREA: {}", err.message)))?;

                Some(ServiceArea::new(center, radius_km * 1000.0))
            }
            (None, None, None) => None,
            _ => {
                return Err(config_error(
                    "SERVICE_AREA_LAT, SERVICE_AREA_LNG and SERVICE_AREA_RADIUS_KM must be set together",
                ))
            }
        };

        let engine = EngineConfig {
            completion_radius_meters: parse(&lookup, "COMPLETION_RADIUS_M")?
                .unwrap_or(defaults.completion_radius_meters),
            pickup_radius_meters: parse(&lookup, "PICKUP_RADIUS_M")?,
            pending_timeout: parse::<i64, _>(&lookup, "PENDING_TIMEOUT_MINUTES")?
                .map(Duration::minutes)
                .unwrap_or(defaults.pending_timeout),
            max_search_radius_km: parse(&lookup, "MAX_SEARCH_RADIUS_KM")?
                .unwrap_or(defaults.max_search_radius_km),
            service_area,
        };

        positive("COMPLETION_RADIUS_M", engine.completion_radius_meters)?;
        positive("MAX_SEARCH_RADIUS_KM", engine.max_search_radius_km)?;
        if let Some(radius) = engine.pickup_radius_meters {
            positive("PICKUP_RADIUS_M", radius)?;
        }

        if engine.pending_timeout <= Duration::zero() {
            return Err(config_error("PENDING_TIMEOUT_MINUTES must be positive"));
        }

        let sweep_interval = parse::<u64, _>(&lookup, "SWEEP_INTERVAL_SECONDS")?.unwrap_or(60);
        if sweep_interval == 0 {
            return Err(config_error("SWEEP_INTERVAL_SECONDS must be at least 1"));
        }

        Ok(Self {
            bind_addr: parse(&lookup, "BIND_ADDR")?
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 3000))),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS")?.unwrap_or(5),
            sweep_interval: std::time::Duration::from_secs(sweep_interval),
            sweep_workers: parse::<usize, _>(&lookup, "SWEEP_WORKERS")?.unwrap_or(4).max(1),
            identity_tokens_file: lookup("IDENTITY_TOKENS_FILE").map(PathBuf::from),
            engine,
        })
    }
}

/// Accepts finite values above zero; `NaN` and infinities parse as `f64` and are refused here.
fn positive(key: &str, value: f64) -> Result<f64, Error> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(config_error(format!("{} must be a positive number", key)))
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| config_error(format!("{}: {}", key, err))),
        None => Ok(None),
    }
}

#[test]
fn defaults_without_environment() {
    let config = Config::from_lookup(|_| None).unwrap();

    assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 3000)));
    assert!(config.database_url.is_none());
    assert_eq!(config.engine.completion_radius_meters, 300.0);
    assert_eq!(config.engine.pending_timeout, Duration::minutes(30));
    assert!(config.engine.pickup_radius_meters.is_none());
    assert!(config.engine.service_area.is_none());
}

#[test]
fn reads_overrides() {
    use std::collections::HashMap;

    let vars: HashMap<&str, &str> = HashMap::from([
        ("BIND_ADDR", "0.0.0.0:8080"),
        ("PENDING_TIMEOUT_MINUTES", "20"),
        ("PICKUP_RADIUS_M", "150"),
        ("SERVICE_AREA_LAT", "14.5995"),
        ("SERVICE_AREA_LNG", "120.9842"),
        ("SERVICE_AREA_RADIUS_KM", "15"),
    ]);

    let config = Config::from_lookup(|key| vars.get(key).map(|value| value.to_string())).unwrap();

    assert_eq!(config.bind_addr.port(), 8080);
    assert_eq!(config.engine.pending_timeout, Duration::minutes(20));
    assert_eq!(config.engine.pickup_radius_meters, Some(150.0));
    assert_eq!(config.engine.service_area.unwrap().radius_meters, 15_000.0);
}

#[test]
fn rejects_partial_service_area_and_garbage() {
    let err = Config::from_lookup(|key| match key {
        "SERVICE_AREA_LAT" => Some("14.5".into()),
        _ => None,
    })
    .unwrap_err();
    assert!(err.is_internal());

    let err = Config::from_lookup(|key| match key {
        "SWEEP_WORKERS" => Some("many".into()),
        _ => None,
    })
    .unwrap_err();
    assert!(err.message.contains("SWEEP_WORKERS"));

    let cases = [
        ("SWEEP_INTERVAL_SECONDS", "0"),
        ("COMPLETION_RADIUS_M", "NaN"),
        ("COMPLETION_RADIUS_M", "-300"),
        ("PICKUP_RADIUS_M", "NaN"),
        ("PICKUP_RADIUS_M", "-5"),
        ("MAX_SEARCH_RADIUS_KM", "inf"),
    ];
    for (name, value) in cases {
        let err = Config::from_lookup(|key| (key == name).then(|| value.to_string())).unwrap_err();
        assert!(err.is_internal());
        assert!(err.message.contains(name), "{} = {}", name, value);
    }

    for radius in ["NaN", "0", "-1"] {
        let err = Config::from_lookup(|key| match key {
            "SERVICE_AREA_LAT" => Some("14.5995".into()),
            "SERVICE_AREA_LNG" => Some("120.9842".into()),
            "SERVICE_AREA_RADIUS_KM" => Some(radius.into()),
            _ => None,
        })
        .unwrap_err();
        assert!(err.message.contains("SERVICE_AREA_RADIUS_KM"));
    }
}
