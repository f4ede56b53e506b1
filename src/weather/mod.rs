pub mod fallback;
pub mod openweather;
pub mod types;
