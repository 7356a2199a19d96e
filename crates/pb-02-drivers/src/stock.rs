//! Stock Bitmain CGI driver: HTTP Digest auth, read-only in this system's
//! model (section 4.2) — it never appears in `GetManageableMiners` because
//! `FirmwareFamily::Stock.is_balanceable()` is false, but discovery still
//! needs to classify and catalog these hosts.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use digest_auth::{AuthContext, WwwAuthenticateHeader};
use pb_shared_types::{DiscoveredPreset, DriverError, FirmwareFamily, MacAddress, MinerDriver, MinerInfo};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StockStatsResponse {
    #[serde(rename = "Type")]
    miner_type: String,
}

#[derive(Debug, Deserialize)]
struct StockMinerConf {
    #[serde(rename = "bitmain-dev-mac")]
    mac: Option<String>,
}

/// HTTP Digest driver for stock Bitmain CGI firmware.
pub struct StockDriver {
    client: reqwest::Client,
    username: String,
    password: String,
    timeout: Duration,
}

impl StockDriver {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            username: username.into(),
            password: password.into(),
            timeout,
        })
    }

    /// One Digest round trip: an unauthenticated GET to harvest the
    /// `WWW-Authenticate` challenge, then the authenticated retry.
    async fn digest_get(&self, ip: IpAddr, path: &str) -> Result<reqwest::Response, DriverError> {
        let url = format!("http://{ip}{path}");
        let challenge_resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;

        if challenge_resp.status() != reqwest::StatusCode::UNAUTHORIZED {
            // Either the CGI endpoint doesn't require auth, or this isn't
            // stock firmware at all; either way there's nothing to digest.
            return Ok(challenge_resp);
        }

        let Some(header_value) = challenge_resp
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
        else {
            return Err(DriverError::NotThisFirmware);
        };

        let mut prompt = WwwAuthenticateHeader::parse(header_value)
            .map_err(|e| DriverError::Auth(e.to_string()))?;
        let context = AuthContext::new(&self.username, &self.password, path);
        let answer = prompt
            .respond(&context)
            .map_err(|e| DriverError::Auth(e.to_string()))?;

        self.client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, answer.to_header_string())
            .send()
            .await
            .map_err(map_transport_error)
    }
}

fn map_transport_error(e: reqwest::Error) -> DriverError {
    if e.is_timeout() {
        DriverError::Timeout(Duration::from_secs(0))
    } else {
        DriverError::Transport(e.to_string())
    }
}

#[async_trait]
impl MinerDriver for StockDriver {
    fn family(&self) -> FirmwareFamily {
        FirmwareFamily::Stock
    }

    async fn probe(&self, ip: IpAddr) -> Result<MinerInfo, DriverError> {
        let stats_resp = tokio::time::timeout(self.timeout, self.digest_get(ip, "/cgi-bin/stats.cgi"))
            .await
            .map_err(|_| DriverError::Timeout(self.timeout))??;

        if !stats_resp.status().is_success() {
            return Err(DriverError::NotThisFirmware);
        }
        let stats: StockStatsResponse = stats_resp
            .json()
            .await
            .map_err(|_| DriverError::NotThisFirmware)?;

        let conf_resp = self.digest_get(ip, "/cgi-bin/get_miner_conf.cgi").await?;
        let mac = if conf_resp.status().is_success() {
            conf_resp
                .json::<StockMinerConf>()
                .await
                .ok()
                .and_then(|c| c.mac)
        } else {
            None
        };

        Ok(MinerInfo {
            model_name: stats.miner_type,
            mac: MacAddress::normalize(&mac.unwrap_or_else(|| format!("unknown-{ip}"))),
            firmware_version: "stock".to_string(),
        })
    }

    /// Stock firmware exposes no per-miner preset menu in this system's model.
    async fn list_presets(&self, _ip: IpAddr) -> Result<Vec<DiscoveredPreset>, DriverError> {
        Ok(Vec::new())
    }

    async fn current_preset(&self, _ip: IpAddr) -> Result<String, DriverError> {
        Err(DriverError::Rejected(
            "stock firmware exposes no preset concept".into(),
        ))
    }

    async fn set_preset(&self, _ip: IpAddr, _preset_name: &str) -> Result<(), DriverError> {
        Err(DriverError::Rejected(
            "stock firmware is not balanceable".into(),
        ))
    }
}
