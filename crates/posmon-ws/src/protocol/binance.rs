//! Binance USDⓈ-M futures mark price stream.
//!
//! Accepts all three payload shapes the venue produces:
//! - raw event: `{"e":"markPriceUpdate","s":"BTCUSDT","p":"27000.1",..}`
//! - combined stream: `{"stream":"btcusdt@markPrice@1s","data":{..}}`
//! - all-market array: `[{"e":"markPriceUpdate",..},..]`

use super::{parse_mark, ParsedFrame, StreamProtocol};
use crate::error::WsResult;
use posmon_core::{PriceTick, Venue};
use serde_json::{json, Value};
use std::collections::BTreeSet;

const MARK_PRICE_EVENT: &str = "markPriceUpdate";
const ALL_MARKET_STREAM: &str = "!markPrice@arr@1s";

#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceProtocol;

impl BinanceProtocol {
    fn stream_name(symbol: &str) -> String {
        format!("{}@markPrice@1s", symbol.to_ascii_lowercase())
    }

    fn request(method: &str, symbols: &BTreeSet<String>, request_id: u64) -> WsResult<Vec<String>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<String> = symbols.iter().map(|s| Self::stream_name(s)).collect();
        let frame = json!({ "method": method, "params": params, "id": request_id });
        Ok(vec![serde_json::to_string(&frame)?])
    }

    fn tick(event: &Value) -> Option<PriceTick> {
        if event.get("e").and_then(Value::as_str) != Some(MARK_PRICE_EVENT) {
            return None;
        }
        let symbol = event.get("s").and_then(Value::as_str)?;
        let mark = parse_mark(event.get("p")?)?;
        Some(PriceTick::new(symbol.to_ascii_uppercase(), mark))
    }

    fn parse_value(value: &Value) -> ParsedFrame {
        match value {
            Value::Array(items) => {
                let ticks: Vec<PriceTick> = items.iter().filter_map(Self::tick).collect();
                if ticks.is_empty() {
                    ParsedFrame::Ignored
                } else {
                    ParsedFrame::Prices(ticks)
                }
            }
            Value::Object(obj) => {
                if let Some(data) = obj.get("data") {
                    return Self::parse_value(data);
                }
                if let Some(error) = obj.get("error") {
                    return ParsedFrame::Rejected(error.to_string());
                }
                if obj.contains_key("result") && obj.contains_key("id") {
                    return ParsedFrame::Ack;
                }
                match obj.get("e").and_then(Value::as_str) {
                    Some(MARK_PRICE_EVENT) => match Self::tick(value) {
                        Some(tick) => ParsedFrame::Prices(vec![tick]),
                        None => ParsedFrame::Malformed(format!("invalid {MARK_PRICE_EVENT}")),
                    },
                    _ => ParsedFrame::Ignored,
                }
            }
            _ => ParsedFrame::Ignored,
        }
    }
}

impl StreamProtocol for BinanceProtocol {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn endpoint(&self, base_url: &str) -> String {
        format!("{}/ws", base_url.trim_end_matches('/'))
    }

    fn inline_endpoint(&self, base_url: &str, symbols: &BTreeSet<String>) -> Option<String> {
        let base = base_url.trim_end_matches('/');
        if symbols.is_empty() {
            return Some(format!("{base}/ws/{ALL_MARKET_STREAM}"));
        }
        let streams: Vec<String> = symbols.iter().map(|s| Self::stream_name(s)).collect();
        Some(format!("{base}/stream?streams={}", streams.join("/")))
    }

    fn subscribe_frames(&self, symbols: &BTreeSet<String>, request_id: u64) -> WsResult<Vec<String>> {
        Self::request("SUBSCRIBE", symbols, request_id)
    }

    fn unsubscribe_frames(
        &self,
        symbols: &BTreeSet<String>,
        request_id: u64,
    ) -> WsResult<Vec<String>> {
        Self::request("UNSUBSCRIBE", symbols, request_id)
    }

    fn parse(&self, text: &str) -> ParsedFrame {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::parse_value(&value),
            Err(e) => ParsedFrame::Malformed(e.to_string()),
        }
    }
}
