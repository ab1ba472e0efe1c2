//! Public offer and brand catalog.

use std::collections::HashMap;

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::api::send_json;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::types::{Brand, BrandWithOffers, OfferDetail, OfferSummary};

/// Reads offers and brands. Offer details are cached by code for the
/// lifetime of the client.
pub struct CatalogClient {
    http: reqwest::Client,
    api_url: String,
    public_key: String,
    offers: Mutex<HashMap<String, OfferDetail>>,
}

impl CatalogClient {
    pub fn new(http: reqwest::Client, config: &AgentConfig) -> Self {
        Self {
            http,
            api_url: config.api_url.clone(),
            public_key: config.public_key.clone(),
            offers: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.api_url))
            .header("x-public-key", &self.public_key)
    }

    /// Offer details for a shareable offer code.
    pub async fn offer_by_code(&self, code: &str) -> Result<OfferDetail, AgentError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AgentError::Validation("Offer code is required".to_string()));
        }

        if let Some(offer) = self.offers.lock().await.get(code) {
            tracing::debug!(code, "offer cache hit");
            return Ok(offer.clone());
        }

        let path = format!("offer/sdk/code/{}", urlencoding::encode(code));
        let offer: OfferDetail = send_json(self.get(&path), "offer").await?;
        tracing::info!(code, offer = %offer.id, brand = %offer.brand.id, "loaded offer");

        self.offers
            .lock()
            .await
            .insert(code.to_string(), offer.clone());
        Ok(offer)
    }

    pub async fn brands(&self) -> Result<Vec<Brand>, AgentError> {
        send_json(self.get("brand/sdk/brands"), "brands").await
    }

    pub async fn brand_offers(&self, brand_id: &str) -> Result<Vec<OfferSummary>, AgentError> {
        let path = format!("offer/sdk/brand/{}", urlencoding::encode(brand_id));
        send_json(self.get(&path), "brand offers").await
    }

    /// Every brand with its offers. A brand whose offers fail to load is
    /// returned with an empty list rather than failing the whole call.
    pub async fn brands_with_offers(&self) -> Result<Vec<BrandWithOffers>, AgentError> {
        let brands = self.brands().await?;
        let lookups = brands.into_iter().map(|brand| async move {
            let offers = match self.brand_offers(&brand.id).await {
                Ok(offers) => offers,
                Err(e) => {
                    tracing::warn!(brand = %brand.id, error = %e, "failed to load brand offers");
                    Vec::new()
                }
            };
            BrandWithOffers { brand, offers }
        });
        Ok(join_all(lookups).await)
    }

    pub async fn clear_cache(&self) {
        self.offers.lock().await.clear();
    }
}
