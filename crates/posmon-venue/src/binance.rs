//! Binance USDⓈ-M futures snapshot client.

use crate::credentials::Credentials;
use crate::error::{VenueError, VenueResult};
use crate::signing::sign_hex;
use async_trait::async_trait;
use posmon_core::decimal::parse_decimal_or_zero;
use posmon_core::{
    MarginInfo, MarginKey, MarginType, PositionRecord, PositionSide, Price, Size, SnapshotSource,
    SourceResult, Venue,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_REST_URL: &str = "https://fapi.binance.com";

/// Error codes that mean the key, signature or permissions are wrong.
const AUTH_ERROR_CODES: [i64; 4] = [-1022, -2008, -2014, -2015];

/// Entry of `GET /fapi/v2/positionRisk`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPositionRisk {
    pub symbol: String,
    pub position_amt: String,
    pub entry_price: String,
    #[serde(rename = "unRealizedProfit", default)]
    pub unrealized_profit: String,
    #[serde(default)]
    pub liquidation_price: String,
    #[serde(default)]
    pub margin_type: String,
    #[serde(default)]
    pub isolated_wallet: String,
    /// `BOTH` in one-way mode, `LONG`/`SHORT` in hedge mode.
    #[serde(default)]
    pub position_side: String,
}

/// `GET /fapi/v2/account`, only the fields used for margin.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAccount {
    #[serde(default)]
    pub positions: Vec<RawAccountPosition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAccountPosition {
    pub symbol: String,
    #[serde(default)]
    pub initial_margin: String,
    #[serde(default)]
    pub isolated_wallet: String,
    #[serde(default)]
    pub isolated: bool,
    #[serde(default)]
    pub position_side: String,
    #[serde(default)]
    pub position_amt: String,
}

#[derive(Debug, Deserialize)]
struct RawApiError {
    code: i64,
    #[serde(default)]
    msg: String,
}

/// Side of a Binance position entry. Hedge mode names it, one-way mode
/// encodes it in the sign of the amount.
fn side_of(position_side: &str, amount: rust_decimal::Decimal) -> PositionSide {
    PositionSide::parse(position_side).unwrap_or_else(|| PositionSide::from_signed(amount))
}

/// Convert position risk entries into records, dropping flat entries.
pub fn parse_position_risk(raw: Vec<RawPositionRisk>) -> Vec<PositionRecord> {
    raw.into_iter()
        .filter_map(|p| {
            let amount = parse_decimal_or_zero(&p.position_amt);
            if amount.is_zero() {
                return None;
            }
            Some(PositionRecord {
                side: side_of(&p.position_side, amount),
                size: Size::magnitude(amount),
                entry_price: Price::parse_or_zero(&p.entry_price),
                liquidation_price: Price::parse_or_zero(&p.liquidation_price).non_zero(),
                unrealized_pnl: (!p.unrealized_profit.is_empty())
                    .then(|| parse_decimal_or_zero(&p.unrealized_profit)),
                margin_type: MarginType::parse(&p.margin_type),
                margin_amount: None,
                symbol: p.symbol,
            })
        })
        .collect()
}

/// Margin per open position: isolated wallet for isolated positions,
/// initial margin for crossed ones.
pub fn parse_account_margins(account: RawAccount) -> HashMap<MarginKey, MarginInfo> {
    account
        .positions
        .into_iter()
        .filter_map(|p| {
            let amount = parse_decimal_or_zero(&p.position_amt);
            if amount.is_zero() {
                return None;
            }
            let (margin, margin_type) = if p.isolated {
                (parse_decimal_or_zero(&p.isolated_wallet), MarginType::Isolated)
            } else {
                (parse_decimal_or_zero(&p.initial_margin), MarginType::Crossed)
            };
            let key = match PositionSide::parse(&p.position_side) {
                Some(side) => MarginKey::sided(p.symbol, side),
                None => MarginKey::symbol(p.symbol),
            };
            Some((
                key,
                MarginInfo {
                    amount: margin,
                    margin_type: Some(margin_type),
                },
            ))
        })
        .collect()
}

/// Map a non-success response to an error.
pub fn classify_error(status: u16, body: &str) -> VenueError {
    if let Ok(api) = serde_json::from_str::<RawApiError>(body) {
        if AUTH_ERROR_CODES.contains(&api.code) || status == 401 || status == 403 {
            return VenueError::Authentication(format!("code={} msg={}", api.code, api.msg));
        }
        return VenueError::Api {
            code: api.code.to_string(),
            msg: api.msg,
        };
    }
    VenueError::Status {
        status,
        body: body.to_string(),
    }
}

/// Signed REST client for Binance USDⓈ-M futures.
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    recv_window_ms: u64,
}

impl BinanceClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> VenueResult<Self> {
        Ok(Self {
            client: crate::http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms: 5000,
        })
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    async fn signed_get<T: DeserializeOwned>(&self, path: &str) -> VenueResult<T> {
        let query = format!(
            "recvWindow={}&timestamp={}",
            self.recv_window_ms,
            chrono::Utc::now().timestamp_millis()
        );
        let signature = sign_hex(&self.credentials.api_secret, &query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(|e| VenueError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VenueError::HttpClient(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let err = classify_error(status.as_u16(), &body);
            warn!(path, status = status.as_u16(), error = %err, "Binance request failed");
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| VenueError::Parse(format!("{path}: {e}")))
    }

    pub async fn position_risk(&self) -> VenueResult<Vec<PositionRecord>> {
        let raw: Vec<RawPositionRisk> = self.signed_get("/fapi/v2/positionRisk").await?;
        let records = parse_position_risk(raw);
        debug!(count = records.len(), "Fetched Binance positions");
        Ok(records)
    }

    pub async fn account_margins(&self) -> VenueResult<HashMap<MarginKey, MarginInfo>> {
        let raw: RawAccount = self.signed_get("/fapi/v2/account").await?;
        Ok(parse_account_margins(raw))
    }
}

#[async_trait]
impl SnapshotSource for BinanceClient {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn fetch_positions(&self) -> SourceResult<Vec<PositionRecord>> {
        Ok(self.position_risk().await?)
    }

    async fn fetch_margins(&self) -> SourceResult<HashMap<MarginKey, MarginInfo>> {
        Ok(self.account_margins().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn risk(json: &str) -> Vec<RawPositionRisk> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_one_way_positions() {
        let raw = risk(
            r#"[
            {"symbol":"BTCUSDT","positionAmt":"0.010","entryPrice":"27000.0","markPrice":"27100.0",
             "unRealizedProfit":"1.00000000","liquidationPrice":"20000.5","leverage":"20",
             "marginType":"isolated","isolatedMargin":"13.5","isolatedWallet":"13.4","positionSide":"BOTH"},
            {"symbol":"ETHUSDT","positionAmt":"-2","entryPrice":"1800","unRealizedProfit":"-4",
             "liquidationPrice":"0","marginType":"cross","positionSide":"BOTH"},
            {"symbol":"XRPUSDT","positionAmt":"0.0","entryPrice":"0.0","unRealizedProfit":"0",
             "liquidationPrice":"0","marginType":"cross","positionSide":"BOTH"}
        ]"#,
        );

        let records = parse_position_risk(raw);
        assert_eq!(records.len(), 2);

        let btc = &records[0];
        assert_eq!(btc.side, PositionSide::Long);
        assert_eq!(btc.size.inner(), dec!(0.010));
        assert_eq!(btc.liquidation_price, Some(Price::new(dec!(20000.5))));
        assert_eq!(btc.unrealized_pnl, Some(dec!(1)));
        assert_eq!(btc.margin_type, Some(MarginType::Isolated));

        let eth = &records[1];
        assert_eq!(eth.side, PositionSide::Short);
        assert_eq!(eth.size.inner(), dec!(2));
        assert_eq!(eth.liquidation_price, None);
        assert_eq!(eth.margin_type, Some(MarginType::Crossed));
    }

    #[test]
    fn test_parse_hedge_mode_positions() {
        let raw = risk(
            r#"[
            {"symbol":"BTCUSDT","positionAmt":"0.5","entryPrice":"100","positionSide":"LONG"},
            {"symbol":"BTCUSDT","positionAmt":"-0.2","entryPrice":"110","positionSide":"SHORT"}
        ]"#,
        );
        let records = parse_position_risk(raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].side, PositionSide::Long);
        assert_eq!(records[1].side, PositionSide::Short);
        assert_eq!(records[1].size.inner(), dec!(0.2));
        assert_eq!(records[0].unrealized_pnl, None);
    }

    #[test]
    fn test_non_numeric_fields_become_zero() {
        let raw = risk(
            r#"[{"symbol":"BTCUSDT","positionAmt":"1","entryPrice":"n/a","unRealizedProfit":"??","liquidationPrice":""}]"#,
        );
        let records = parse_position_risk(raw);
        assert_eq!(records[0].entry_price, Price::ZERO);
        assert_eq!(records[0].unrealized_pnl, Some(rust_decimal::Decimal::ZERO));
    }

    #[test]
    fn test_account_margins() {
        let account: RawAccount = serde_json::from_str(
            r#"{"totalWalletBalance":"100","positions":[
                {"symbol":"BTCUSDT","initialMargin":"13.55","isolatedWallet":"14.0","isolated":true,"positionSide":"BOTH","positionAmt":"0.01"},
                {"symbol":"ETHUSDT","initialMargin":"90","isolatedWallet":"0","isolated":false,"positionSide":"SHORT","positionAmt":"-2"},
                {"symbol":"XRPUSDT","initialMargin":"0","isolatedWallet":"0","isolated":false,"positionSide":"BOTH","positionAmt":"0"}
            ]}"#,
        )
        .unwrap();

        let margins = parse_account_margins(account);
        assert_eq!(margins.len(), 2);
        assert_eq!(
            margins[&MarginKey::symbol("BTCUSDT")],
            MarginInfo {
                amount: dec!(14.0),
                margin_type: Some(MarginType::Isolated)
            }
        );
        assert_eq!(
            margins[&MarginKey::sided("ETHUSDT", PositionSide::Short)].amount,
            dec!(90)
        );
    }

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error(401, r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#),
            VenueError::Authentication(_)
        ));
        assert!(matches!(
            classify_error(400, r#"{"code":-1022,"msg":"Signature for this request is not valid."}"#),
            VenueError::Authentication(_)
        ));
        assert!(matches!(
            classify_error(400, r#"{"code":-1021,"msg":"Timestamp for this request is outside of the recvWindow."}"#),
            VenueError::Api { .. }
        ));
        assert!(matches!(
            classify_error(502, "<html>Bad Gateway</html>"),
            VenueError::Status { status: 502, .. }
        ));
    }
}
