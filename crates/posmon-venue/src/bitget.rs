//! Bitget USDT futures snapshot client.
//!
//! One endpoint carries everything: `all-position` reports side, size, entry,
//! liquidation price, margin and venue PnL per position, so no separate margin
//! query is made.

use crate::credentials::Credentials;
use crate::error::{VenueError, VenueResult};
use crate::signing::sign_base64;
use async_trait::async_trait;
use posmon_core::decimal::parse_decimal_or_zero;
use posmon_core::{
    MarginType, PositionRecord, PositionSide, Price, Size, SnapshotSource, SourceResult, Venue,
};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_REST_URL: &str = "https://api.bitget.com";

const POSITIONS_PATH: &str = "/api/v2/mix/position/all-position";
const SUCCESS_CODE: &str = "00000";

/// Codes for bad key, bad signature, bad passphrase, expired key or
/// insufficient permissions.
const AUTH_ERROR_CODES: [&str; 6] = ["40006", "40009", "40012", "40014", "40037", "40038"];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

/// Entry of `GET /api/v2/mix/position/all-position`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    pub symbol: String,
    pub hold_side: String,
    pub total: String,
    pub open_price_avg: String,
    #[serde(default)]
    pub liquidation_price: String,
    #[serde(default)]
    pub margin_size: String,
    #[serde(default)]
    pub margin_mode: String,
    #[serde(rename = "unrealizedPL", default)]
    pub unrealized_pl: String,
}

/// Convert all-position entries into records, dropping flat or unsided ones.
pub fn parse_positions(raw: Vec<RawPosition>) -> Vec<PositionRecord> {
    raw.into_iter()
        .filter_map(|p| {
            let size = Size::magnitude(parse_decimal_or_zero(&p.total));
            if size.is_zero() {
                return None;
            }
            let Some(side) = PositionSide::parse(&p.hold_side) else {
                warn!(symbol = %p.symbol, hold_side = %p.hold_side, "Skipping position with unknown side");
                return None;
            };
            Some(PositionRecord {
                side,
                size,
                entry_price: Price::parse_or_zero(&p.open_price_avg),
                liquidation_price: Price::parse_or_zero(&p.liquidation_price)
                    .non_zero()
                    .filter(|px| px.is_positive()),
                unrealized_pnl: (!p.unrealized_pl.is_empty())
                    .then(|| parse_decimal_or_zero(&p.unrealized_pl)),
                margin_type: MarginType::parse(&p.margin_mode),
                margin_amount: (!p.margin_size.is_empty())
                    .then(|| parse_decimal_or_zero(&p.margin_size)),
                symbol: p.symbol,
            })
        })
        .collect()
}

/// Map a non-success response to an error.
pub fn classify_error(status: u16, code: Option<&str>, msg: &str) -> VenueError {
    match code {
        Some(code) if AUTH_ERROR_CODES.contains(&code) => {
            VenueError::Authentication(format!("code={code} msg={msg}"))
        }
        _ if status == 401 || status == 403 => {
            VenueError::Authentication(format!("HTTP {status}: {msg}"))
        }
        Some(code) => VenueError::Api {
            code: code.to_string(),
            msg: msg.to_string(),
        },
        None => VenueError::Status {
            status,
            body: msg.to_string(),
        },
    }
}

/// Signed REST client for Bitget USDT futures.
pub struct BitgetClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    product_type: String,
    margin_coin: String,
}

impl BitgetClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> VenueResult<Self> {
        if credentials.passphrase.is_none() {
            return Err(VenueError::MissingCredential(
                "Bitget API passphrase".to_string(),
            ));
        }
        Ok(Self {
            client: crate::http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            product_type: "USDT-FUTURES".to_string(),
            margin_coin: "USDT".to_string(),
        })
    }

    pub async fn all_positions(&self) -> VenueResult<Vec<PositionRecord>> {
        let query = format!(
            "productType={}&marginCoin={}",
            self.product_type, self.margin_coin
        );
        let request_path = format!("{POSITIONS_PATH}?{query}");
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let prehash = format!("{timestamp}GET{request_path}");
        let signature = sign_base64(&self.credentials.api_secret, &prehash);

        let response = self
            .client
            .get(format!("{}{}", self.base_url, request_path))
            .header("ACCESS-KEY", &self.credentials.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", &timestamp)
            .header(
                "ACCESS-PASSPHRASE",
                self.credentials.passphrase.as_deref().unwrap_or_default(),
            )
            .header("locale", "en-US")
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| VenueError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| VenueError::HttpClient(format!("Failed to read response: {e}")))?;

        let envelope: Envelope<Vec<RawPosition>> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !(200..300).contains(&status) => {
                return Err(classify_error(status, None, &body));
            }
            Err(e) => return Err(VenueError::Parse(format!("{POSITIONS_PATH}: {e}"))),
        };

        if envelope.code != SUCCESS_CODE || !(200..300).contains(&status) {
            let err = classify_error(status, Some(&envelope.code), &envelope.msg);
            warn!(status, error = %err, "Bitget request failed");
            return Err(err);
        }

        let records = parse_positions(envelope.data.unwrap_or_default());
        debug!(count = records.len(), "Fetched Bitget positions");
        Ok(records)
    }
}

#[async_trait]
impl SnapshotSource for BitgetClient {
    fn venue(&self) -> Venue {
        Venue::Bitget
    }

    async fn fetch_positions(&self) -> SourceResult<Vec<PositionRecord>> {
        Ok(self.all_positions().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_positions() {
        let envelope: Envelope<Vec<RawPosition>> = serde_json::from_str(
            r#"{"code":"00000","msg":"success","requestTime":1695800000000,"data":[
                {"marginCoin":"USDT","symbol":"BTCUSDT","holdSide":"long","total":"0.01","available":"0.01",
                 "openPriceAvg":"27000","leverage":"20","marginMode":"crossed","marginSize":"13.5",
                 "liquidationPrice":"21000.1","unrealizedPL":"1.2","markPrice":"27120"},
                {"marginCoin":"USDT","symbol":"BTCUSDT","holdSide":"short","total":"0.02",
                 "openPriceAvg":"27500","marginMode":"isolated","marginSize":"30",
                 "liquidationPrice":"-1","unrealizedPL":"7.6"},
                {"marginCoin":"USDT","symbol":"ETHUSDT","holdSide":"long","total":"0",
                 "openPriceAvg":"0","marginMode":"crossed"}
            ]}"#,
        )
        .unwrap();

        let records = parse_positions(envelope.data.unwrap());
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].side, PositionSide::Long);
        assert_eq!(records[0].margin_amount, Some(dec!(13.5)));
        assert_eq!(records[0].margin_type, Some(MarginType::Crossed));
        assert_eq!(records[0].liquidation_price, Some(Price::new(dec!(21000.1))));

        assert_eq!(records[1].side, PositionSide::Short);
        assert_eq!(records[1].size.inner(), dec!(0.02));
        assert_eq!(records[1].unrealized_pnl, Some(dec!(7.6)));
        assert_eq!(records[1].liquidation_price, None);
        assert_eq!(records[1].margin_type, Some(MarginType::Isolated));
    }

    #[test]
    fn test_legacy_symbol_kept_as_reported() {
        let raw: Vec<RawPosition> = serde_json::from_str(
            r#"[{"symbol":"BTCUSDT_UMCBL","holdSide":"long","total":"1","openPriceAvg":"100"}]"#,
        )
        .unwrap();
        let records = parse_positions(raw);
        assert_eq!(records[0].symbol, "BTCUSDT_UMCBL");
        assert_eq!(
            Venue::Bitget.channel_mapping().apply(&records[0].symbol),
            "BTCUSDT"
        );
    }

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error(400, Some("40009"), "sign signature error"),
            VenueError::Authentication(_)
        ));
        assert!(matches!(
            classify_error(403, None, "forbidden"),
            VenueError::Authentication(_)
        ));
        assert!(matches!(
            classify_error(429, Some("429"), "Too Many Requests"),
            VenueError::Api { .. }
        ));
        assert!(matches!(
            classify_error(500, None, "oops"),
            VenueError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn test_requires_passphrase() {
        let result = BitgetClient::new(
            DEFAULT_REST_URL,
            Credentials::new("key", "secret"),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(VenueError::MissingCredential(_))));
    }
}
