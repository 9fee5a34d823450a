//! Async STAC client for searching spatio-temporal asset catalogs.
//!
//! Supports Planetary Computer and Earth Search out of the box, plus
//! arbitrary STAC API endpoints via [`StacCatalog::Custom`]. Requests are
//! attempted once; callers wrap them in a [`crate::retry::RetryPolicy`].

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CloudError, Result};
use crate::http::HttpClient;
use crate::stac_models::{StacItem, StacItemCollection, StacLink, StacSearchParams};

// ---------------------------------------------------------------------------
// Catalog enum
// ---------------------------------------------------------------------------

/// Well-known STAC catalogs plus custom endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StacCatalog {
    /// Microsoft Planetary Computer STAC API.
    PlanetaryComputer,
    /// AWS Earth Search (Element 84).
    EarthSearch,
    /// Any STAC API endpoint (provide the root URL, e.g.
    /// `"https://my-stac.example.com/api/v1"`).
    Custom(String),
}

impl StacCatalog {
    /// Return the full POST `/search` URL for this catalog.
    pub fn search_url(&self) -> String {
        match self {
            Self::PlanetaryComputer => {
                "https://planetarycomputer.microsoft.com/api/stac/v1/search".to_string()
            }
            Self::EarthSearch => "https://earth-search.aws.element84.com/v1/search".to_string(),
            Self::Custom(base) => {
                let base = base.trim_end_matches('/');
                if base.ends_with("/search") {
                    base.to_string()
                } else {
                    format!("{}/search", base)
                }
            }
        }
    }

    /// Parse a shorthand string into a catalog.
    ///
    /// Recognized shorthands: `"pc"`, `"planetary-computer"`, `"es"`,
    /// `"earth-search"`. Anything else is treated as a custom URL.
    pub fn from_str_or_url(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pc" | "planetary-computer" | "planetarycomputer" => Self::PlanetaryComputer,
            "es" | "earth-search" | "earthsearch" => Self::EarthSearch,
            _ => Self::Custom(s.to_string()),
        }
    }

    /// Whether this catalog requires SAS token signing for asset access.
    pub fn needs_signing(&self) -> bool {
        matches!(self, Self::PlanetaryComputer)
    }

    /// Asset keys of the Sentinel-2 red and near-infrared bands.
    pub fn red_nir_assets(&self) -> [&'static str; 2] {
        match self {
            Self::PlanetaryComputer => ["B04", "B08"],
            _ => ["red", "nir"],
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for [`StacClient`].
#[derive(Debug, Clone)]
pub struct StacClientOptions {
    /// Per-request timeout (default 30 s).
    pub request_timeout: Duration,
    /// Items requested per page (default 100).
    pub page_size: u32,
    /// Maximum total items to fetch across pages (default 2000).
    pub max_items: usize,
}

impl Default for StacClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            page_size: 100,
            max_items: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Async client for STAC Item Search.
#[derive(Clone)]
pub struct StacClient {
    catalog: StacCatalog,
    http: HttpClient,
    options: StacClientOptions,
}

impl StacClient {
    /// Create a new STAC client.
    pub fn new(catalog: StacCatalog, options: StacClientOptions) -> Result<Self> {
        let http = HttpClient::new(options.request_timeout)?;
        Ok(Self {
            catalog,
            http,
            options,
        })
    }

    /// The catalog this client is configured for.
    pub fn catalog(&self) -> &StacCatalog {
        &self.catalog
    }

    /// HTTP client shared with COG readers.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    // ── Single-page search ──────────────────────────────────────────

    /// Execute a single search request and return one page of results.
    pub async fn search(&self, params: &StacSearchParams) -> Result<StacItemCollection> {
        let url = self.catalog.search_url();
        self.post_search(&url, params).await
    }

    // ── Paginated search ────────────────────────────────────────────

    /// Search with automatic pagination, collecting up to `max_items` items.
    pub async fn search_all(&self, params: &StacSearchParams) -> Result<Vec<StacItem>> {
        let max = self.options.max_items;
        let params = with_page_size(params, self.options.page_size);
        let mut all_items: Vec<StacItem> = Vec::new();

        let mut page = self.search(&params).await?;

        loop {
            let next = page.next_link().cloned();
            all_items.append(&mut page.features);

            if all_items.len() >= max {
                if next.is_some() || all_items.len() > max {
                    warn!(max, "search result truncated");
                }
                break;
            }

            match next {
                Some(link) => {
                    page = self.follow_next(&link, &params).await?;
                    if page.is_empty() {
                        break;
                    }
                }
                None => break,
            }
        }

        all_items.truncate(max);
        debug!(items = all_items.len(), "search complete");
        Ok(all_items)
    }

    /// Number of items matching `params`.
    ///
    /// Uses the server-reported match count when available and pages
    /// through the results otherwise.
    pub async fn count_matches(&self, params: &StacSearchParams) -> Result<u64> {
        let probe = params.clone().limit(1);
        let page = self.search(&probe).await?;
        if let Some(n) = page.matched_count() {
            return Ok(n);
        }
        debug!("catalog does not report match counts; paging");
        Ok(self.search_all(params).await?.len() as u64)
    }

    // ── Planetary Computer SAS token signing ────────────────────────

    /// Sign an asset href for Planetary Computer via the `/sign` endpoint.
    ///
    /// For non-PC catalogs this is a no-op and returns the href unchanged.
    pub async fn sign_asset_href(&self, href: &str) -> Result<String> {
        if !self.catalog.needs_signing() {
            return Ok(href.to_string());
        }
        self.sign_pc_href(href).await
    }

    // ── Private helpers ─────────────────────────────────────────────

    async fn post_search(&self, url: &str, params: &StacSearchParams) -> Result<StacItemCollection> {
        let resp = self
            .http
            .inner()
            .post(url)
            .header("Content-Type", "application/json")
            .json(params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                body = %body.chars().take(300).collect::<String>(),
                "STAC search failed"
            );
            return Err(CloudError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| CloudError::Catalog(format!("parsing STAC response: {e}")))
    }

    /// Follow a pagination link. Handles both POST (body/merge) and GET links.
    async fn follow_next(
        &self,
        link: &StacLink,
        original_params: &StacSearchParams,
    ) -> Result<StacItemCollection> {
        let method = link.method.as_deref().unwrap_or("GET").to_uppercase();

        if method == "POST" {
            let mut base = serde_json::to_value(original_params)
                .map_err(|e| CloudError::Catalog(format!("serializing params: {e}")))?;
            let body = match &link.body {
                Some(link_body) if link.merge.unwrap_or(false) => {
                    if let (Some(base_obj), Some(link_obj)) =
                        (base.as_object_mut(), link_body.as_object())
                    {
                        for (k, v) in link_obj {
                            base_obj.insert(k.clone(), v.clone());
                        }
                    }
                    base
                }
                Some(link_body) => link_body.clone(),
                None => base,
            };

            let merged: StacSearchParams = serde_json::from_value(body)
                .map_err(|e| CloudError::Catalog(format!("parsing merged params: {e}")))?;
            self.post_search(&link.href, &merged).await
        } else {
            let resp = self.http.inner().get(&link.href).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(CloudError::HttpStatus {
                    status: status.as_u16(),
                    url: link.href.clone(),
                });
            }
            let body = resp.text().await?;
            serde_json::from_str(&body)
                .map_err(|e| CloudError::Catalog(format!("parsing pagination response: {e}")))
        }
    }

    /// Sign a single href via the Planetary Computer `/api/sas/v1/sign` endpoint.
    async fn sign_pc_href(&self, href: &str) -> Result<String> {
        let url = "https://planetarycomputer.microsoft.com/api/sas/v1/sign";
        let resp = self
            .http
            .inner()
            .get(url)
            .query(&[("href", href)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CloudError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body: serde_json::Value = resp.json().await?;
        body["href"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| CloudError::Catalog("PC sign response missing 'href' field".into()))
    }
}

fn with_page_size(params: &StacSearchParams, page_size: u32) -> StacSearchParams {
    match params.limit {
        Some(_) => params.clone(),
        None => params.clone().limit(page_size),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
