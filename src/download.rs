//! Talks to the Copernicus Data Space Sentinel Hub endpoints: client-credentials token exchange
//! and the Process API that renders the per-day index raster.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    area::AreaOfInterest,
    config::AuthConfig,
    error::{Error, Result},
    extent::GridExtent,
};

/// Pixel evaluation script run by the provider. Reflectances are scaled by 1/10000 and the
/// default output carries `[NDVI, NDRE, NDMI, GCI, B08, B04, B05]` as FLOAT32.
pub const EVALSCRIPT: &str = r#"//VERSION=3
function setup() {
    return {
        input: ["B03", "B04", "B05", "B08", "B11", "SCL", "dataMask"],
        output: [
            { id: "default", bands: 7, sampleType: "FLOAT32" },
            { id: "scl", bands: 1, sampleType: "INT8" },
            { id: "dataMask", bands: 1, sampleType: "INT8" }
        ]
    };
}

function evaluatePixel(sample) {
    let B03 = sample.B03 / 10000.0; // green
    let B04 = sample.B04 / 10000.0; // red
    let B05 = sample.B05 / 10000.0; // red edge 1
    let B08 = sample.B08 / 10000.0; // NIR
    let B11 = sample.B11 / 10000.0; // SWIR

    let ndvi = (B08 - B04) / (B08 + B04);
    let ndre = (B08 - B05) / (B08 + B05);
    let ndmi = (B08 - B11) / (B08 + B11);
    let gci = (B08 / B03) - 1.0;

    return {
        default: [ndvi, ndre, ndmi, gci, B08, B04, B05],
        scl: [sample.SCL],
        dataMask: [sample.dataMask]
    };
}"#;

pub const COLLECTION: &str = "sentinel-2-l2a";

/// Access token as returned by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Token {
    pub access_token: String,
    /// Declared lifetime in seconds.
    pub expires_in: u64,
}

/// Body of one Process API call covering a single day.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub body: Value,
}

impl ProcessRequest {
    pub fn new(
        area: &AreaOfInterest,
        extent: GridExtent,
        from: NaiveDateTime,
        to: NaiveDateTime,
        max_cloud_coverage: u8,
    ) -> Self {
        let body = json!({
            "input": {
                "bounds": {
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [area.lon_lat_ring()],
                    }
                },
                "data": [{
                    "type": COLLECTION,
                    "dataFilter": {
                        "timeRange": {
                            "from": iso_utc(from),
                            "to": iso_utc(to),
                        },
                        "maxCloudCoverage": max_cloud_coverage,
                    }
                }]
            },
            "output": {
                "width": extent.width,
                "height": extent.height,
                "responses": [{
                    "identifier": "default",
                    "format": { "type": "image/tiff" }
                }]
            },
            "evalscript": EVALSCRIPT,
        });

        ProcessRequest { body }
    }
}

/// Raw provider answer; interpretation is left to the tile fetcher.
#[derive(Debug, Clone)]
pub struct ProcessResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ProcessResponse {
    pub fn is_image(&self) -> bool {
        self.status == 200
            && self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with("image/"))
    }
}

#[async_trait]
pub trait ImageryService {
    async fn authenticate(&self) -> Result<Token>;
    async fn process(&self, access_token: &str, request: &ProcessRequest) -> Result<ProcessResponse>;
}

pub struct CopernicusClient {
    client: Client,
    auth: AuthConfig,
    process_url: String,
}

impl CopernicusClient {
    pub fn new(auth: AuthConfig, process_url: &str) -> Self {
        CopernicusClient {
            client: Client::new(),
            auth,
            process_url: process_url.to_string(),
        }
    }
}

#[async_trait]
impl ImageryService for CopernicusClient {
    async fn authenticate(&self) -> Result<Token> {
        let response = self
            .client
            .post(&self.auth.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.auth.client_id.as_str()),
                ("client_secret", self.auth.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Authentication(format!("{}: {}", status, text)));
        }

        let token: Token = response.json().await?;
        if token.access_token.is_empty() {
            return Err(Error::Authentication("empty access token".to_string()));
        }

        Ok(token)
    }

    async fn process(&self, access_token: &str, request: &ProcessRequest) -> Result<ProcessResponse> {
        let response = self
            .client
            .post(&self.process_url)
            .bearer_auth(access_token)
            .json(&request.body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        Ok(ProcessResponse {
            status,
            content_type,
            body,
        })
    }
}

/// `2024-05-01T00:00:00Z`
pub fn iso_utc(instant: NaiveDateTime) -> String {
    format!("{}Z", instant.format("%Y-%m-%dT%H:%M:%S"))
}


// -- Tests -------------------------------------------------------------------
