//! Approximate sun and moon figures for the clock face. No network, no cache.

use crate::utils::round_to_decimals;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use std::f64::consts::PI;

pub const SYNODIC_MONTH_DAYS: f64 = 29.53;

const PHASE_NAMES: [&str; 8] = [
    "New Moon",
    "Waxing Crescent",
    "First Quarter",
    "Waxing Gibbous",
    "Full Moon",
    "Waning Gibbous",
    "Last Quarter",
    "Waning Crescent",
];

#[derive(Debug, Clone, Serialize)]
pub struct Astronomy {
    pub sun: SunData,
    pub moon: MoonData,
}

#[derive(Debug, Clone, Serialize)]
pub struct SunData {
    pub declination: f64,
    pub day_length_hours: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoonData {
    pub phase: f64,
    pub age_days: f64,
    pub phase_name: &'static str,
    pub illumination: f64,
}

/// Solar declination in degrees for a day of the year.
pub fn solar_declination(day_of_year: u32) -> f64 {
    -23.45 * (360.0 / 365.0 * (f64::from(day_of_year) + 10.0)).to_radians().cos()
}

/// Hours of daylight; 24 or 0 inside the polar day/night.
pub fn day_length_hours(lat: f64, declination: f64) -> f64 {
    let cos_hour_angle = -lat.to_radians().tan() * declination.to_radians().tan();
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return if lat * declination > 0.0 { 24.0 } else { 0.0 };
    }
    2.0 * cos_hour_angle.acos().to_degrees() / 15.0
}

fn new_moon_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 6, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Days into the current lunation, always within `[0, 29.53)`. Elapsed time
/// is counted in whole days, floored, so instants before the epoch round
/// toward the earlier day.
pub fn moon_age_days(at: DateTime<Utc>) -> f64 {
    let elapsed = at.signed_duration_since(new_moon_epoch());
    let days = elapsed.num_seconds().div_euclid(86_400) as f64;
    days.rem_euclid(SYNODIC_MONTH_DAYS)
}

pub fn phase_name(phase: f64) -> &'static str {
    let index = ((phase * 8.0).floor() as i64).rem_euclid(8).clamp(0, 7) as usize;
    PHASE_NAMES[index]
}

pub fn illumination(phase: f64) -> f64 {
    if phase <= 0.5 {
        (PI * phase).cos().abs() * 100.0
    } else {
        (PI * (1.0 - phase)).cos().abs() * 100.0
    }
}

/// Sun and moon figures at `at`. Longitude is accepted for the endpoint's
/// signature; none of these approximations depend on it.
pub fn compute(lat: f64, _lon: f64, at: DateTime<Utc>) -> Astronomy {
    let declination = solar_declination(at.ordinal());
    let day_length = day_length_hours(lat, declination);

    let age = moon_age_days(at);
    let phase = age / SYNODIC_MONTH_DAYS;

    Astronomy {
        sun: SunData {
            declination: round_to_decimals(declination, 2),
            day_length_hours: round_to_decimals(day_length, 2),
        },
        moon: MoonData {
            phase: round_to_decimals(phase, 3),
            age_days: round_to_decimals(age, 1),
            phase_name: phase_name(phase),
            illumination: round_to_decimals(illumination(phase), 1),
        },
    }
}
