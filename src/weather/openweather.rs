use crate::config::Config;
use crate::error::UpstreamError;
use crate::utils::truncate;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

pub const WEATHER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherEndpoint {
    Current,
    Forecast,
    OneCall,
    AirQuality,
    Geocode,
}

impl WeatherEndpoint {
    pub fn label(&self) -> &'static str {
        match self {
            WeatherEndpoint::Current => "current",
            WeatherEndpoint::Forecast => "forecast",
            WeatherEndpoint::OneCall => "onecall",
            WeatherEndpoint::AirQuality => "air_quality",
            WeatherEndpoint::Geocode => "geocode",
        }
    }

    fn fixed_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            WeatherEndpoint::OneCall => &[("exclude", "minutely")],
            WeatherEndpoint::Geocode => &[("limit", "5")],
            _ => &[],
        }
    }
}

pub struct OpenWeatherClient {
    client: Client,
    config: Config,
}

impl OpenWeatherClient {
    pub fn new(config: Config) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .user_agent("AmbientWeatherGateway/1.0")
            .timeout(WEATHER_TIMEOUT)
            .build()
            .map_err(UpstreamError::Transport)?;

        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.openweather_api_key.is_some()
    }

    fn path(&self, endpoint: WeatherEndpoint) -> &str {
        match endpoint {
            WeatherEndpoint::Current => &self.config.openweather_current_path,
            WeatherEndpoint::Forecast => &self.config.openweather_forecast_path,
            WeatherEndpoint::OneCall => &self.config.openweather_onecall_path,
            WeatherEndpoint::AirQuality => &self.config.openweather_air_pollution_path,
            WeatherEndpoint::Geocode => &self.config.openweather_geocode_direct_path,
        }
    }

    /// One outbound call, no retries. Missing credentials fail before any I/O.
    pub async fn fetch(
        &self,
        endpoint: WeatherEndpoint,
        params: &[(&str, &str)],
    ) -> Result<Value, UpstreamError> {
        let api_key = self
            .config
            .openweather_api_key
            .as_deref()
            .ok_or(UpstreamError::NotConfigured("Weather API"))?;

        let url = format!("{}{}", self.config.openweather_base_url, self.path(endpoint));

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(endpoint.fixed_params())
            .query(&[("appid", api_key)])
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, WEATHER_TIMEOUT))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: truncate(&error_text, 200),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, WEATHER_TIMEOUT))?;

        serde_json::from_slice(&body).map_err(|e| UpstreamError::MalformedBody(e.to_string()))
    }
}
