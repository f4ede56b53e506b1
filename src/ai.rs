use crate::config::Config;
use crate::error::UpstreamError;
use crate::utils::{parse_timezone, truncate};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const AI_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

pub struct AiClient {
    client: Client,
    config: Config,
}

impl AiClient {
    pub fn new(config: Config) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .user_agent("AmbientWeatherGateway/1.0")
            .timeout(AI_TIMEOUT)
            .build()
            .map_err(UpstreamError::Transport)?;

        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.gemini_api_key.is_some()
    }

    /// Single `generateContent` call; the first candidate's text is returned.
    pub async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        let api_key = self
            .config
            .gemini_api_key
            .as_deref()
            .ok_or(UpstreamError::NotConfigured("Gemini API"))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.gemini_base_url, self.config.gemini_model
        );
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, AI_TIMEOUT))?;

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
            .map_err(|e| UpstreamError::from_reqwest(e, AI_TIMEOUT))?;
        let parsed: GenerateResponse = serde_json::from_slice(&body)
            .map_err(|e| UpstreamError::MalformedBody(e.to_string()))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(UpstreamError::MalformedBody(
                "response contained no text".to_string(),
            ));
        }

        Ok(text)
    }
}

/// Inputs for the weather summary narrative.
#[derive(Debug, Clone)]
pub struct SummaryInput {
    pub weather: Value,
    pub hourly: Vec<Value>,
    pub daily: Vec<Value>,
    pub location: String,
    pub style: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurn {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatInput {
    pub message: String,
    pub weather: Option<Value>,
    pub hourly: Vec<Value>,
    pub daily: Vec<Value>,
    pub location: String,
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone)]
pub struct BriefingInput {
    pub weather: Value,
    pub forecast: Vec<Value>,
    pub timezone: String,
}

fn style_preamble(style: &str) -> &'static str {
    match style {
        "scientific" => "Give a scientific, detailed weather analysis with meteorological terms.",
        "eli5" => "Explain the weather like I'm 5 years old. Use simple words and fun comparisons.",
        _ => "Give a friendly, conversational weather summary. Be warm and helpful.",
    }
}

/// Renders a JSON field for a prompt, `N/A` when absent or null.
fn field(value: Option<&Value>, key: &str) -> String {
    match value.and_then(|v| v.get(key)) {
        None | Some(Value::Null) => "N/A".to_string(),
        Some(Value::String(s)) if s.is_empty() => "N/A".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .get("dt")
        .and_then(Value::as_i64)
        .and_then(|dt| DateTime::from_timestamp(dt, 0))
}

fn rain_percent(value: &Value) -> i64 {
    let pop = value.get("pop").and_then(Value::as_f64).unwrap_or(0.0);
    (pop * 100.0).round() as i64
}

fn description(value: &Value) -> String {
    field(value.get("weather").and_then(|w| w.get(0)), "description")
}

fn current_conditions(weather: Option<&Value>) -> String {
    format!(
        "- Temperature: {}°\n\
         - Feels like: {}°\n\
         - Conditions: {}\n\
         - Humidity: {}%\n\
         - Wind: {} m/s\n",
        field(weather, "temp"),
        field(weather, "feels_like"),
        field(weather, "description"),
        field(weather, "humidity"),
        field(weather, "wind_speed"),
    )
}

pub fn build_summary_prompt(input: &SummaryInput) -> String {
    let mut hourly_text = String::new();
    for hour in input.hourly.iter().take(6).filter(|h| h.is_object()) {
        if let Some(at) = timestamp(hour) {
            hourly_text.push_str(&format!(
                "- {}: {}°, {}, Rain: {}%\n",
                at.format("%H:%M"),
                field(Some(hour), "temp"),
                description(hour),
                rain_percent(hour)
            ));
        }
    }

    let mut daily_text = String::new();
    for day in input.daily.iter().take(3).filter(|d| d.is_object()) {
        if let Some(at) = timestamp(day) {
            let temp = day.get("temp");
            daily_text.push_str(&format!(
                "- {}: High {}°, Low {}°, {}\n",
                at.format("%A"),
                field(temp, "max"),
                field(temp, "min"),
                description(day)
            ));
        }
    }

    format!(
        "{}\n\n\
         Based on this weather data, provide a helpful weather summary (3-4 sentences):\n\n\
         **Current conditions in {}:**\n\
         {}\n\
         **Upcoming hours:**\n\
         {}\n\n\
         **Upcoming days:**\n\
         {}\n\n\
         Include what to expect and any recommendations. Use **bold** for important points.",
        style_preamble(&input.style),
        input.location,
        current_conditions(Some(&input.weather)),
        or_na(&hourly_text),
        or_na(&daily_text),
    )
}

pub fn build_chat_prompt(input: &ChatInput) -> String {
    let mut context = format!(
        "Current weather in {}:\n{}",
        input.location,
        current_conditions(input.weather.as_ref())
    );

    let hours: Vec<String> = input
        .hourly
        .iter()
        .take(8)
        .filter_map(|hour| {
            timestamp(hour).map(|at| {
                format!(
                    "- {}: {}°, Rain: {}%",
                    at.format("%H:%M"),
                    field(Some(hour), "temp"),
                    rain_percent(hour)
                )
            })
        })
        .collect();
    if !hours.is_empty() {
        context.push_str("\nUpcoming hours:\n");
        context.push_str(&hours.join("\n"));
        context.push('\n');
    }

    let days: Vec<String> = input
        .daily
        .iter()
        .take(5)
        .filter_map(|day| {
            timestamp(day).map(|at| {
                let temp = day.get("temp");
                format!(
                    "- {}: High {}°, Low {}°",
                    at.format("%A"),
                    field(temp, "max"),
                    field(temp, "min")
                )
            })
        })
        .collect();
    if !days.is_empty() {
        context.push_str("\nUpcoming days:\n");
        context.push_str(&days.join("\n"));
        context.push('\n');
    }

    let skip = input.history.len().saturating_sub(6);
    let conversation: String = input
        .history
        .iter()
        .skip(skip)
        .map(|turn| {
            let role = if turn.role == "user" { "User" } else { "Assistant" };
            format!("{}: {}\n", role, turn.content)
        })
        .collect();

    format!(
        "You are a helpful weather assistant for an ambient clock display. \
         Answer questions about the weather concisely and helpfully. Use **bold** for emphasis.\n\n\
         {}\n\
         {}\n\
         User: {}\n\n\
         Respond helpfully and concisely (2-3 sentences unless more detail is needed). \
         If asked about something unrelated to weather, politely redirect to weather topics.",
        context, conversation, input.message
    )
}

pub fn build_briefing_prompt(input: &BriefingInput, now: DateTime<Utc>) -> String {
    let weather = Some(&input.weather);

    let forecast_text: String = input
        .forecast
        .iter()
        .take(8)
        .filter(|item| item.is_object())
        .map(|item| {
            format!(
                "- {}: {}°, {}\n",
                field(Some(item), "time"),
                field(Some(item), "temp"),
                field(Some(item), "description")
            )
        })
        .collect();

    let local_date = match parse_timezone(&input.timezone) {
        Ok(tz) => format!("Local date: {}\n", now.with_timezone(&tz).format("%A, %B %-d")),
        Err(_) => String::new(),
    };

    let location = match field(weather, "location").as_str() {
        "N/A" => "Unknown".to_string(),
        other => other.to_string(),
    };

    format!(
        "You are an ambient display assistant. Generate a calming, helpful daily briefing.\n\n\
         Current Weather:\n\
         - Temperature: {}°\n\
         - Feels like: {}°\n\
         - Conditions: {}\n\
         - Humidity: {}%\n\
         - Sunrise: {}\n\
         - Sunset: {}\n\n\
         Upcoming forecast:\n\
         {}\n\
         Location: {}\n\
         Timezone: {}\n\
         {}\n\
         Provide a brief, calming daily briefing (3-4 sentences) that includes:\n\
         1. Current conditions summary\n\
         2. What to expect throughout the day\n\
         3. Any clothing or activity recommendations",
        field(weather, "temp"),
        field(weather, "feels_like"),
        field(weather, "description"),
        field(weather, "humidity"),
        field(weather, "sunrise"),
        field(weather, "sunset"),
        or_na(&forecast_text),
        location,
        input.timezone,
        local_date,
    )
}

fn or_na(text: &str) -> &str {
    if text.is_empty() {
        "N/A"
    } else {
        text
    }
}
