//! Bitget USDT futures ticker stream.
//!
//! Subscriptions are sent as `{"op":"subscribe","args":[..]}` on the public
//! v2 endpoint. The venue expects a literal `ping` text frame and answers
//! `pong`.

use super::{parse_mark, ParsedFrame, StreamProtocol};
use crate::error::WsResult;
use posmon_core::{PriceTick, Venue};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Bitget caps the size of one request, so large sets are split.
const MAX_ARGS_PER_FRAME: usize = 50;

#[derive(Debug, Clone)]
pub struct BitgetProtocol {
    inst_type: String,
    channel: String,
}

impl Default for BitgetProtocol {
    fn default() -> Self {
        Self {
            inst_type: "USDT-FUTURES".to_string(),
            channel: "ticker".to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Arg<'a> {
    inst_type: &'a str,
    channel: &'a str,
    inst_id: &'a str,
}

#[derive(Serialize)]
struct Request<'a> {
    op: &'a str,
    args: Vec<Arg<'a>>,
}

impl BitgetProtocol {
    fn request(&self, op: &str, symbols: &BTreeSet<String>) -> WsResult<Vec<String>> {
        let symbols: Vec<&String> = symbols.iter().collect();
        symbols
            .chunks(MAX_ARGS_PER_FRAME)
            .map(|chunk| -> WsResult<String> {
                let request = Request {
                    op,
                    args: chunk
                        .iter()
                        .map(|s| Arg {
                            inst_type: &self.inst_type,
                            channel: &self.channel,
                            inst_id: s.as_str(),
                        })
                        .collect(),
                };
                Ok(serde_json::to_string(&request)?)
            })
            .collect()
    }

    fn tick(item: &Value) -> Option<PriceTick> {
        let symbol = item.get("instId").and_then(Value::as_str)?;
        let mark = parse_mark(item.get("markPrice")?)?;
        Some(PriceTick::new(symbol.to_ascii_uppercase(), mark))
    }
}

impl StreamProtocol for BitgetProtocol {
    fn venue(&self) -> Venue {
        Venue::Bitget
    }

    fn endpoint(&self, base_url: &str) -> String {
        base_url.trim_end_matches('/').to_string()
    }

    fn subscribe_frames(&self, symbols: &BTreeSet<String>, _request_id: u64) -> WsResult<Vec<String>> {
        self.request("subscribe", symbols)
    }

    fn unsubscribe_frames(
        &self,
        symbols: &BTreeSet<String>,
        _request_id: u64,
    ) -> WsResult<Vec<String>> {
        self.request("unsubscribe", symbols)
    }

    fn parse(&self, text: &str) -> ParsedFrame {
        if text.trim() == "pong" {
            return ParsedFrame::Pong;
        }

        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return ParsedFrame::Malformed(e.to_string()),
        };

        match value.get("event").and_then(Value::as_str) {
            Some("subscribe") | Some("unsubscribe") => return ParsedFrame::Ack,
            Some("error") => {
                let msg = value
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                let code = value.get("code").map(|c| c.to_string()).unwrap_or_default();
                return ParsedFrame::Rejected(format!("{code} {msg}").trim().to_string());
            }
            Some(_) => return ParsedFrame::Ignored,
            None => {}
        }

        let channel = value
            .get("arg")
            .and_then(|a| a.get("channel"))
            .and_then(Value::as_str);
        if channel != Some(self.channel.as_str()) {
            return ParsedFrame::Ignored;
        }

        let Some(items) = value.get("data").and_then(Value::as_array) else {
            return ParsedFrame::Malformed("ticker push without data array".to_string());
        };
        let ticks: Vec<PriceTick> = items.iter().filter_map(Self::tick).collect();
        if ticks.is_empty() {
            ParsedFrame::Malformed("ticker push without valid markPrice".to_string())
        } else {
            ParsedFrame::Prices(ticks)
        }
    }

    fn ping_frame(&self) -> Option<String> {
        Some("ping".to_string())
    }
}
