use moka::future::Cache;
use serde::Deserialize;
use std::{fmt, net::IpAddr, time::Duration};

const IP_API_ENDPOINT: &str =
    "http://ip-api.com/json/{ip}?fields=status,message,country,regionName,city";

const HTTP_TIMEOUT: Duration = Duration::from_secs(3);
const CACHE_TTL: Duration = Duration::from_secs(15 * 60);
const CACHE_CAPACITY: u64 = 10_000;

/// ip-api failure messages that will not change on retry.
const DEFINITIVE_FAILURES: [&str; 3] = ["private range", "reserved range", "invalid query"];

/// Where a click came from, as reported by ip-api.com.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoInfo {
    pub country: String,
    pub region: String,
    pub city: String,
}

/// "city, region, country", skipping empty parts.
impl fmt::Display for GeoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [&self.city, &self.region, &self.country]
            .into_iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[derive(Deserialize)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    city: Option<String>,
}

/// Resolves client IPs to a location.
///
/// Answers are cached per address for 15 minutes, up to 10 000 addresses.
/// Only definitive answers are cached: a transport error, a non-2xx status
/// (ip-api rate limiting answers 429) or an unparseable body is retried on
/// the next click from that address.
#[derive(Clone)]
pub struct GeoLocator {
    client: reqwest::Client,
    endpoint: String,
    cache: Cache<IpAddr, Option<GeoInfo>>,
}

impl GeoLocator {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_endpoint(IP_API_ENDPOINT)
    }

    /// `endpoint` is an ip-api style URL with `{ip}` as the address placeholder.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        let cache = Cache::builder()
            .time_to_live(CACHE_TTL)
            .max_capacity(CACHE_CAPACITY)
            .build();

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            cache,
        })
    }

    /// Look up `ip`. Returns `None` for unparseable or non-public addresses and
    /// for failed lookups.
    pub async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        let addr = public_addr(ip)?;

        // Concurrent misses for one address share a single request.
        self.cache
            .optionally_get_with(addr, self.fetch(addr))
            .await
            .flatten()
    }

    /// `Some(answer)` when ip-api gave a definitive answer, `None` when the
    /// lookup should be retried later.
    async fn fetch(&self, addr: IpAddr) -> Option<Option<GeoInfo>> {
        let url = self.endpoint.replace("{ip}", &addr.to_string());

        let body: IpApiResponse = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| tracing::debug!("geo lookup request failed for {}: {}", addr, e))
            .ok()?
            .json()
            .await
            .map_err(|e| tracing::debug!("geo lookup parse error for {}: {}", addr, e))
            .ok()?;

        if body.status != "success" {
            let message = body.message.unwrap_or_default();
            tracing::debug!("geo lookup for {} failed: '{}'", addr, message);
            return DEFINITIVE_FAILURES
                .contains(&message.as_str())
                .then_some(None);
        }

        let info = GeoInfo {
            country: body.country.unwrap_or_default(),
            region: body.region_name.unwrap_or_default(),
            city: body.city.unwrap_or_default(),
        };

        Some((!info.to_string().is_empty()).then_some(info))
    }
}

/// Parse `ip` and keep it only if a public geolocation service could know it.
fn public_addr(ip: &str) -> Option<IpAddr> {
    let addr: IpAddr = ip.trim().parse().ok()?;

    let addr = match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
        v4 => v4,
    };

    let public = match addr {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xffc0) == 0xfe80 // link-local
                || (first & 0xfe00) == 0xfc00) // unique-local
        }
    };

    public.then_some(addr)
}

/// Serve `router` on a local port and return its ip-api style endpoint.
#[cfg(test)]
pub(crate) async fn serve_ip_api(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}/json/{{ip}}")
}
