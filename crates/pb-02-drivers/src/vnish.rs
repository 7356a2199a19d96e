//! VNish REST driver: the only balanceable firmware family (section 4.2).
//!
//! Authenticates once per host via the firmware's unlock endpoint, caches
//! the bearer token keyed by host with a TTL, and refreshes it lazily on
//! the next call after expiry — mirroring the reference workspace's
//! per-host credential cache convention for network adapters (section 5).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pb_shared_types::{DriverError, FirmwareFamily, MacAddress};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::label::parse_label;
use pb_shared_types::{DiscoveredPreset, MinerDriver, MinerInfo};

const TOKEN_TTL: Duration = Duration::from_secs(600);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct UnlockResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(rename = "minerType")]
    miner_type: String,
    #[serde(rename = "macAddr")]
    mac_addr: String,
    #[serde(rename = "fwVersion")]
    fw_version: String,
    #[serde(rename = "overclockPreset")]
    overclock_preset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PresetEntry {
    name: String,
    label: String,
    #[serde(rename = "requiresModdedPsu", default)]
    requires_modded_psu: bool,
}

/// Bearer-token REST driver for VNish firmware.
pub struct VNishDriver {
    client: reqwest::Client,
    password: String,
    timeout: Duration,
    tokens: Mutex<HashMap<IpAddr, CachedToken>>,
}

impl VNishDriver {
    pub fn new(password: impl Into<String>, timeout: Duration) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            password: password.into(),
            timeout,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    fn cached_token(&self, ip: IpAddr) -> Option<String> {
        let tokens = self.tokens.lock().expect("token cache poisoned");
        tokens.get(&ip).and_then(|cached| {
            if cached.expires_at > Instant::now() {
                Some(cached.token.clone())
            } else {
                None
            }
        })
    }

    async fn unlock(&self, ip: IpAddr) -> Result<String, DriverError> {
        let url = format!("http://{ip}/api/v1/unlock");
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "pw": self.password }))
            .send()
            .await
            .map_err(map_transport_error)?;

        if !resp.status().is_success() {
            return Err(DriverError::Auth(format!(
                "unlock rejected with status {}",
                resp.status()
            )));
        }
        let parsed: UnlockResponse = resp
            .json()
            .await
            .map_err(|e| DriverError::MalformedResponse(e.to_string()))?;

        self.tokens.lock().expect("token cache poisoned").insert(
            ip,
            CachedToken {
                token: parsed.token.clone(),
                expires_at: Instant::now() + TOKEN_TTL,
            },
        );
        Ok(parsed.token)
    }

    async fn token_for(&self, ip: IpAddr) -> Result<String, DriverError> {
        if let Some(token) = self.cached_token(ip) {
            return Ok(token);
        }
        self.unlock(ip).await
    }

    /// Issues a GET with the cached bearer token, refreshing once on 401.
    async fn authed_get(&self, ip: IpAddr, path: &str) -> Result<reqwest::Response, DriverError> {
        let mut token = self.token_for(ip).await?;
        let url = format!("http://{ip}{path}");
        let mut resp = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(map_transport_error)?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            debug!(%ip, "vnish token expired mid-flight, refreshing");
            token = self.unlock(ip).await?;
            resp = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(map_transport_error)?;
        }
        Ok(resp)
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
impl MinerDriver for VNishDriver {
    fn family(&self) -> FirmwareFamily {
        FirmwareFamily::VNish
    }

    async fn probe(&self, ip: IpAddr) -> Result<MinerInfo, DriverError> {
        let resp = tokio::time::timeout(self.timeout, self.authed_get(ip, "/api/v1/summary"))
            .await
            .map_err(|_| DriverError::Timeout(self.timeout))??;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DriverError::NotThisFirmware);
        }
        if !resp.status().is_success() {
            return Err(DriverError::NotThisFirmware);
        }
        let summary: SummaryResponse = resp
            .json()
            .await
            .map_err(|_| DriverError::NotThisFirmware)?;

        Ok(MinerInfo {
            model_name: summary.miner_type,
            mac: MacAddress::normalize(&summary.mac_addr),
            firmware_version: summary.fw_version,
        })
    }

    async fn list_presets(&self, ip: IpAddr) -> Result<Vec<DiscoveredPreset>, DriverError> {
        let resp = self.authed_get(ip, "/api/v1/overclock/presets").await?;
        if !resp.status().is_success() {
            return Err(DriverError::Rejected(format!(
                "list_presets failed with status {}",
                resp.status()
            )));
        }
        let entries: Vec<PresetEntry> = resp
            .json()
            .await
            .map_err(|e| DriverError::MalformedResponse(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let (watts, hashrate_th) = parse_label(&entry.label);
                if watts == 0 {
                    warn!(ip = %ip, label = %entry.label, "preset label did not parse, storing watts=0");
                }
                DiscoveredPreset {
                    name: entry.name,
                    label: entry.label,
                    watts,
                    hashrate_th,
                    requires_modded_psu: entry.requires_modded_psu,
                }
            })
            .collect())
    }

    async fn current_preset(&self, ip: IpAddr) -> Result<String, DriverError> {
        let resp = self.authed_get(ip, "/api/v1/summary").await?;
        if !resp.status().is_success() {
            return Err(DriverError::Rejected(format!(
                "current_preset failed with status {}",
                resp.status()
            )));
        }
        let summary: SummaryResponse = resp
            .json()
            .await
            .map_err(|e| DriverError::MalformedResponse(e.to_string()))?;
        summary
            .overclock_preset
            .ok_or_else(|| DriverError::MalformedResponse("no active preset reported".into()))
    }

    async fn set_preset(&self, ip: IpAddr, preset_name: &str) -> Result<(), DriverError> {
        let token = self.token_for(ip).await?;
        let url = format!("http://{ip}/api/v1/overclock/preset");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&serde_json::json!({ "name": preset_name }))
            .send()
            .await
            .map_err(map_transport_error)?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(DriverError::Rejected(format!(
                "set_preset({preset_name}) rejected with status {}",
                resp.status()
            )))
        }
    }
}
