use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::warn;

use crate::config::WeatherConfig;
use crate::news::USER_AGENT;

#[derive(Debug, Clone, PartialEq)]
pub struct Weather {
    pub city: String,
    pub description: String,
    /// Degrees Celsius
    pub temperature: f64,
    pub icon: String,
}

impl Weather {
    pub fn icon_url(&self) -> String {
        format!("https://openweathermap.org/img/wn/{}@2x.png", self.icon)
    }

    pub fn temperature_label(&self) -> String {
        format!("{:.1}°C", self.temperature)
    }
}

#[derive(Deserialize)]
struct CurrentResponse {
    #[serde(default)]
    name: String,
    weather: Vec<Condition>,
    main: Readings,
}

#[derive(Deserialize)]
struct Condition {
    description: String,
    icon: String,
}

#[derive(Deserialize)]
struct Readings {
    temp: f64,
}

/// Upper-case the first character and lower-case the rest.
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

pub struct WeatherClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl WeatherClient {
    pub fn new(config: &WeatherConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Current conditions for `city`, or `None` when the lookup fails for
    /// any reason.
    pub async fn current(&self, city: &str) -> Option<Weather> {
        let city = city.trim();
        if city.is_empty() {
            return None;
        }

        match self.fetch(city).await {
            Ok(weather) => weather,
            Err(e) => {
                warn!("Weather API error for '{}': {}", city, e);
                None
            }
        }
    }

    async fn fetch(&self, city: &str) -> anyhow::Result<Option<Weather>> {
        let response = self
            .client
            .get(format!("{}/data/2.5/weather", self.base_url))
            .query(&[("q", city), ("appid", self.api_key.as_str()), ("units", "metric")])
            .send()
            .await
            // The URL carries the API key
            .map_err(reqwest::Error::without_url)?;

        if response.status() != StatusCode::OK {
            warn!("Weather API returned {} for '{}'", response.status(), city);
            return Ok(None);
        }

        let data: CurrentResponse = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)?;
        let Some(condition) = data.weather.into_iter().next() else {
            return Ok(None);
        };

        let name = if data.name.is_empty() {
            city.to_string()
        } else {
            data.name
        };

        Ok(Some(Weather {
            city: name,
            description: capitalize(&condition.description),
            temperature: data.main.temp,
            icon: condition.icon,
        }))
    }
}
