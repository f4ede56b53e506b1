//! Synthetic stand-ins for OpenWeather payloads, served in demo mode when the
//! real provider is unconfigured or failing. Shapes match the upstream
//! payloads; values are random within fixed bounds.

use super::types::*;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

const DEMO_LOCATION: &str = "Demo Location";

// (id, main, description, icon)
const CURRENT_CONDITIONS: [(i32, &str, &str, &str); 5] = [
    (800, "Clear", "clear sky", "01d"),
    (801, "Clouds", "few clouds", "02d"),
    (802, "Clouds", "scattered clouds", "03d"),
    (500, "Rain", "light rain", "10d"),
    (804, "Clouds", "overcast clouds", "04d"),
];

const FORECAST_CONDITIONS: [(i32, &str, &str, &str); 4] = [
    (800, "Clear", "clear sky", "01d"),
    (801, "Clouds", "few clouds", "02d"),
    (802, "Clouds", "scattered clouds", "03d"),
    (500, "Rain", "light rain", "10d"),
];

pub const FORECAST_ENTRIES: usize = 40;
pub const FORECAST_STEP_HOURS: i64 = 3;

fn is_metric(units: &str) -> bool {
    units == "metric"
}

/// Inclusive temperature bounds for current conditions.
pub fn current_temp_bounds(units: &str) -> (i32, i32) {
    if is_metric(units) {
        (15, 25)
    } else {
        (60, 80)
    }
}

/// Inclusive temperature bounds for forecast entries.
pub fn forecast_temp_bounds(units: &str) -> (i32, i32) {
    if is_metric(units) {
        (12, 28)
    } else {
        (55, 85)
    }
}

fn condition(entry: (i32, &str, &str, &str)) -> Condition {
    let (id, main, description, icon) = entry;
    Condition {
        id,
        main: main.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
    }
}

fn at_utc(now: DateTime<Utc>, hour: u32, minute: u32) -> i64 {
    now.date_naive()
        .and_hms_opt(hour, minute, 0)
        .map(|t| t.and_utc().timestamp())
        .unwrap_or_else(|| now.timestamp())
}

pub fn synthesize_current<R: Rng + ?Sized>(
    rng: &mut R,
    lat: f64,
    lon: f64,
    units: &str,
    now: DateTime<Utc>,
) -> CurrentWeather {
    let (low, high) = current_temp_bounds(units);
    let temp = f64::from(rng.gen_range(low..=high));
    let idx = rng.gen_range(0..CURRENT_CONDITIONS.len());

    CurrentWeather {
        coord: Coord { lat, lon },
        weather: vec![condition(CURRENT_CONDITIONS[idx])],
        main: MainReadings {
            temp,
            feels_like: temp - 2.0,
            temp_min: temp - 1.0,
            temp_max: temp + 1.0,
            pressure: f64::from(rng.gen_range(1010..=1025)),
            humidity: f64::from(rng.gen_range(40..=80)),
        },
        visibility: 10_000,
        wind: Wind {
            speed: f64::from(rng.gen_range(2..=10)),
            deg: f64::from(rng.gen_range(0..360)),
        },
        clouds: Clouds {
            all: f64::from(rng.gen_range(0..=100)),
        },
        dt: now.timestamp(),
        sys: SunTimes {
            sunrise: at_utc(now, 6, 30),
            sunset: at_utc(now, 18, 30),
        },
        timezone: 0,
        name: DEMO_LOCATION.to_string(),
    }
}

pub fn synthesize_forecast<R: Rng + ?Sized>(
    rng: &mut R,
    lat: f64,
    lon: f64,
    units: &str,
    now: DateTime<Utc>,
) -> ForecastResponse {
    let (low, high) = forecast_temp_bounds(units);

    let list: Vec<ForecastItem> = (0..FORECAST_ENTRIES as i64)
        .map(|i| {
            let at = now + Duration::hours(i * FORECAST_STEP_HOURS);
            let temp = f64::from(rng.gen_range(low..=high));
            let idx = rng.gen_range(0..FORECAST_CONDITIONS.len());

            ForecastItem {
                dt: at.timestamp(),
                main: MainReadings {
                    temp,
                    feels_like: temp - 2.0,
                    temp_min: temp - 1.0,
                    temp_max: temp + 1.0,
                    pressure: f64::from(rng.gen_range(1010..=1025)),
                    humidity: f64::from(rng.gen_range(40..=80)),
                },
                weather: vec![condition(FORECAST_CONDITIONS[idx])],
                clouds: Clouds {
                    all: f64::from(rng.gen_range(0..=100)),
                },
                wind: Wind {
                    speed: f64::from(rng.gen_range(2..=10)),
                    deg: f64::from(rng.gen_range(0..360)),
                },
                visibility: 10_000,
                pop: rng.gen_range(0.0..0.5),
                dt_txt: at.format("%Y-%m-%d %H:%M:%S").to_string(),
            }
        })
        .collect();

    ForecastResponse {
        cod: "200".to_string(),
        message: 0.0,
        cnt: list.len() as i32,
        list,
        city: City {
            name: DEMO_LOCATION.to_string(),
            coord: Coord { lat, lon },
            country: String::new(),
            timezone: 0,
            sunrise: at_utc(now, 6, 30),
            sunset: at_utc(now, 18, 30),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_current_shape_and_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for units in ["metric", "imperial", "standard"] {
            for _ in 0..200 {
                let weather = synthesize_current(&mut rng, 51.5, -0.12, units, fixed_now());
                let (low, high) = current_temp_bounds(units);

                assert!(weather.main.temp >= f64::from(low) && weather.main.temp <= f64::from(high));
                assert_eq!(weather.main.feels_like, weather.main.temp - 2.0);
                assert!((40.0..=80.0).contains(&weather.main.humidity));
                assert!((1010.0..=1025.0).contains(&weather.main.pressure));
                assert!((2.0..=10.0).contains(&weather.wind.speed));
                assert!((0.0..360.0).contains(&weather.wind.deg));
                assert!((0.0..=100.0).contains(&weather.clouds.all));
                assert_eq!(weather.visibility, 10_000);
                assert_eq!(weather.weather.len(), 1);
            }
        }
    }

    #[test]
    fn test_current_serializes_expected_keys() {
        let mut rng = StdRng::seed_from_u64(1);
        let value =
            serde_json::to_value(synthesize_current(&mut rng, 1.0, 2.0, "metric", fixed_now()))
                .unwrap();

        for key in ["coord", "weather", "main", "wind", "clouds", "visibility", "sys", "name"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        for key in ["temp", "feels_like", "humidity", "pressure"] {
            assert!(value["main"].get(key).is_some(), "missing main.{}", key);
        }
        assert!(value["weather"][0]["description"].is_string());
        assert!(value["weather"][0]["icon"].is_string());
        assert_eq!(value["sys"]["sunrise"], 1710916200);
        assert_eq!(value["sys"]["sunset"], 1710959400);
        assert_eq!(value["coord"]["lat"], 1.0);
    }

    #[test]
    fn test_forecast_has_forty_three_hourly_entries() {
        let mut rng = StdRng::seed_from_u64(3);
        let now = fixed_now();
        let forecast = synthesize_forecast(&mut rng, 10.0, 20.0, "metric", now);

        assert_eq!(forecast.list.len(), FORECAST_ENTRIES);
        assert_eq!(forecast.cnt, 40);
        assert_eq!(forecast.list[0].dt, now.timestamp());
        for pair in forecast.list.windows(2) {
            assert_eq!(pair[1].dt - pair[0].dt, 3 * 60 * 60);
        }
        assert_eq!(
            forecast.list[39].dt - forecast.list[0].dt,
            39 * 3 * 60 * 60
        );
        assert_eq!(forecast.list[0].dt_txt, "2024-03-20 12:00:00");
    }

    #[test]
    fn test_forecast_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        for units in ["metric", "imperial"] {
            let (low, high) = forecast_temp_bounds(units);
            let forecast = synthesize_forecast(&mut rng, 0.0, 0.0, units, fixed_now());
            for item in &forecast.list {
                assert!(item.main.temp >= f64::from(low) && item.main.temp <= f64::from(high));
                assert!(item.pop >= 0.0 && item.pop < 1.0);
                assert!(item.pop < 0.5);
                assert_eq!(item.weather.len(), 1);
            }
        }
    }
}
