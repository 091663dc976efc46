//! Product extraction from the Open Food Facts search API
//!
//! Extraction never retries. Every failure is classified and handed back to
//! the caller; retry policy belongs to the scheduler.

use async_trait::async_trait;
use reqwest::Client;
use retail_common::{EtlError, ExtractionErrorKind, RawProduct, Result};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::config::ApiConfig;

/// Columns requested from the API. Everything else is dropped server-side.
pub const PRODUCT_FIELDS: &str =
    "code,product_name,brands,categories,quantity,stores,countries,nutriscore_grade,last_modified_t";

const SEARCH_PATH: &str = "/cgi/search.pl";

/// Anything that can produce raw product rows for a category
#[async_trait]
pub trait ProductSource: Send + Sync {
    async fn fetch(&self, category: &str) -> Result<Vec<RawProduct>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    products: Vec<RawProduct>,
}

/// HTTP client for the category search endpoint
pub struct OpenFoodFactsClient {
    client: Client,
    base_url: String,
    page_size: u32,
    max_pages: u32,
}

impl OpenFoodFactsClient {
    /// Create a client bounded by the configured request timeout
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("retail-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EtlError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            max_pages: config.max_pages,
        })
    }

    fn search_url(&self) -> String {
        format!("{}{}", self.base_url, SEARCH_PATH)
    }

    /// Fetch one page of results
    pub async fn fetch_page(&self, category: &str, page: u32) -> Result<Vec<RawProduct>> {
        let url = self.search_url();
        let params = [
            ("action", "process".to_string()),
            ("tagtype_0", "categories".to_string()),
            ("tag_0", category.to_string()),
            ("page_size", self.page_size.to_string()),
            ("page", page.to_string()),
            ("json", "1".to_string()),
            ("fields", PRODUCT_FIELDS.to_string()),
        ];

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(EtlError::extraction(
                ExtractionErrorKind::from_status(status.as_u16()),
                format!("{} returned {} for page {}", url, status, page),
            ));
        }

        let body: SearchResponse = response.json().await.map_err(classify_request_error)?;

        debug!(page, products = body.products.len(), "Fetched search page");

        Ok(body.products)
    }
}

#[async_trait]
impl ProductSource for OpenFoodFactsClient {
    #[instrument(skip(self))]
    async fn fetch(&self, category: &str) -> Result<Vec<RawProduct>> {
        info!(max_pages = self.max_pages, page_size = self.page_size, "Starting extraction");

        let mut products = Vec::new();
        for page in 1..=self.max_pages {
            let rows = self.fetch_page(category, page).await?;
            let short_page = rows.len() < self.page_size as usize;
            products.extend(rows);
            if short_page {
                break;
            }
        }

        if products.is_empty() {
            warn!("No products returned from API");
        } else {
            info!(rows = products.len(), "Extracted products");
        }

        Ok(products)
    }
}

fn classify_request_error(err: reqwest::Error) -> EtlError {
    let kind = if err.is_timeout() {
        ExtractionErrorKind::Timeout
    } else if err.is_decode() {
        ExtractionErrorKind::Decode
    } else if let Some(status) = err.status() {
        ExtractionErrorKind::from_status(status.as_u16())
    } else {
        ExtractionErrorKind::Transport
    };

    EtlError::extraction(kind, err.to_string())
}
