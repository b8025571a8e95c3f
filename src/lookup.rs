use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub const WEATHER_PLACEHOLDER: &str = "Unknown Weather";
pub const TRENDING_PLACEHOLDER: &str = "Nothing special";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort environmental lookups. Both calls return a placeholder
/// string on any failure; they never surface an error to the caller.
#[async_trait]
pub trait EnvironmentLookup: Send + Sync {
    async fn weather(&self) -> String;
    async fn trending_topic(&self) -> String;
}

/// Live providers: open-meteo style forecast endpoint and an optional
/// SearxNG-style JSON search endpoint for the trending headline.
pub struct LiveLookup {
    client: reqwest::Client,
    weather_api_url: String,
    latitude: f64,
    longitude: f64,
    search_api_url: Option<String>,
    trending_query: String,
}

impl LiveLookup {
    pub fn new(
        weather_api_url: String,
        latitude: f64,
        longitude: f64,
        search_api_url: Option<String>,
        trending_query: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            weather_api_url,
            latitude,
            longitude,
            search_api_url,
            trending_query,
        }
    }

    async fn fetch_weather(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct Forecast {
            current: CurrentWeather,
        }

        #[derive(Deserialize)]
        struct CurrentWeather {
            temperature_2m: f64,
            weather_code: u32,
        }

        let response = self
            .client
            .get(&self.weather_api_url)
            .timeout(LOOKUP_TIMEOUT)
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                (
                    "current",
                    "temperature_2m,weather_code,is_day".to_string(),
                ),
            ])
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        let forecast: Forecast = response.json().await.ok()?;
        Some(describe_weather(
            forecast.current.weather_code,
            forecast.current.temperature_2m,
        ))
    }

    async fn fetch_trending(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct SearchResponse {
            results: Vec<SearchResult>,
        }

        #[derive(Deserialize)]
        struct SearchResult {
            title: String,
        }

        let url = self.search_api_url.as_ref()?;
        let response = self
            .client
            .get(url)
            .timeout(LOOKUP_TIMEOUT)
            .query(&[
                ("q", self.trending_query.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        let results: SearchResponse = response.json().await.ok()?;
        results.results.into_iter().next().map(|r| r.title)
    }
}

#[async_trait]
impl EnvironmentLookup for LiveLookup {
    async fn weather(&self) -> String {
        match self.fetch_weather().await {
            Some(weather) => weather,
            None => WEATHER_PLACEHOLDER.to_string(),
        }
    }

    async fn trending_topic(&self) -> String {
        match self.fetch_trending().await {
            Some(title) => title,
            None => TRENDING_PLACEHOLDER.to_string(),
        }
    }
}

/// Bucket a WMO weather code into a short condition label.
pub fn describe_weather(code: u32, temperature: f64) -> String {
    let condition = if code > 70 {
        "Snowy"
    } else if code > 50 {
        "Rainy"
    } else if code > 3 {
        "Cloudy"
    } else {
        "Clear"
    };
    format!("{}, {}°C", condition, temperature)
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Fixed lookup for tests: no network, deterministic strings.
    pub struct FixedLookup {
        pub weather: String,
        pub trending: String,
    }

    impl FixedLookup {
        pub fn placeholders() -> Self {
            Self {
                weather: WEATHER_PLACEHOLDER.to_string(),
                trending: TRENDING_PLACEHOLDER.to_string(),
            }
        }
    }

    #[async_trait]
    impl EnvironmentLookup for FixedLookup {
        async fn weather(&self) -> String {
            self.weather.clone()
        }

        async fn trending_topic(&self) -> String {
            self.trending.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weather_codes_bucket_into_conditions() {
        assert_eq!(describe_weather(0, 21.5), "Clear, 21.5°C");
        assert_eq!(describe_weather(45, 10.0), "Cloudy, 10°C");
        assert_eq!(describe_weather(61, 8.0), "Rainy, 8°C");
        assert_eq!(describe_weather(73, -2.0), "Snowy, -2°C");
    }

    #[tokio::test]
    async fn unreachable_endpoints_fall_back_to_placeholders() {
        let lookup = LiveLookup::new(
            "http://127.0.0.1:1/forecast".to_string(),
            54.68,
            25.27,
            Some("http://127.0.0.1:1/search".to_string()),
            "gaming technology news".to_string(),
        );
        assert_eq!(lookup.weather().await, WEATHER_PLACEHOLDER);
        assert_eq!(lookup.trending_topic().await, TRENDING_PLACEHOLDER);
    }

    #[tokio::test]
    async fn missing_search_endpoint_means_placeholder() {
        let lookup = LiveLookup::new(
            "http://127.0.0.1:1/forecast".to_string(),
            0.0,
            0.0,
            None,
            "anything".to_string(),
        );
        assert_eq!(lookup.trending_topic().await, TRENDING_PLACEHOLDER);
    }
}
