// Geocoding collaborator against a Nominatim-compatible `/search` endpoint.
// An empty result list is a definite "no such place" (Ok(None)), not an error.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::Geocoder;
use crate::atoms::types::GeoPoint;
use crate::engine::http::{pinned_client, send_checked};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;

pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
    user_agent: String,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
    display_name: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str) -> Self {
        Self {
            client: pinned_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
        }
    }
}

fn to_point(hit: SearchHit) -> EngineResult<GeoPoint> {
    let parse = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| EngineError::collaborator("geocoding", format!("bad coordinate '{}'", s), false))
    };
    Ok(GeoPoint {
        latitude: parse(&hit.lat)?,
        longitude: parse(&hit.lon)?,
        display_name: hit.display_name,
        timezone: None,
    })
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn locate(&self, place: &str) -> EngineResult<Option<GeoPoint>> {
        let url = format!("{}/search", self.base_url);
        debug!("[geocode] Looking up '{}'", place);
        let req = self
            .client
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .query(&[("q", place), ("format", "json"), ("limit", "1")]);
        let hits: Vec<SearchHit> = send_checked("geocoding", req).await?.json().await?;
        hits.into_iter().next().map(to_point).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nominatim_hit() {
        let hits: Vec<SearchHit> = serde_json::from_str(
            r#"[{"place_id":1,"lat":"19.0759899","lon":"72.8773928","display_name":"Mumbai, Maharashtra, India"}]"#,
        )
        .unwrap();
        let point = hits.into_iter().next().map(to_point).transpose().unwrap().unwrap();
        assert!((point.latitude - 19.07599).abs() < 1e-4);
        assert_eq!(point.display_name, "Mumbai, Maharashtra, India");
    }

    #[test]
    fn bad_coordinates_are_not_transient() {
        let hit = SearchHit { lat: "north".into(), lon: "0".into(), display_name: "x".into() };
        assert!(!to_point(hit).unwrap_err().is_transient());
    }
}
