//! Dashboard routes against a real server bound to an ephemeral port.

use futures_util::StreamExt;
use posmon_core::{Position, PositionSide, Price, Size, Venue};
use posmon_dashboard::{serve, AppState, DashboardConfig, DashboardHubs};
use posmon_engine::{BroadcastHub, MergedView, PositionView, UnifiedView, ViewSource};
use rust_decimal_macros::dec;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const SENTINEL: &str = r#"[{"msg":"no open positions"}]"#;
const WAIT: Duration = Duration::from_secs(5);

/// View source whose content the test switches.
#[derive(Default)]
struct Switch {
    open: RwLock<bool>,
}

impl Switch {
    fn open(&self) {
        *self.open.write().unwrap() = true;
    }
}

impl ViewSource for Switch {
    fn view(&self) -> MergedView {
        if !*self.open.read().unwrap() {
            return MergedView::default();
        }
        let position = Position {
            symbol: "ETHUSDT".to_string(),
            side: PositionSide::Short,
            size: Size::new(dec!(3)),
            entry_price: Price::new(dec!(50)),
            liquidation_price: None,
            margin_amount: None,
            margin_type: None,
            last_known_pnl: Some(dec!(15)),
            updated_at: chrono::Utc::now(),
        };
        MergedView::new(vec![PositionView::new(Venue::Bitget, &position, None)])
    }
}

struct Harness {
    base: String,
    source: Arc<Switch>,
    venue_hub: Arc<BroadcastHub>,
    unified_hub: Arc<BroadcastHub>,
    shutdown: CancellationToken,
}

async fn start(config: DashboardConfig) -> Harness {
    let source = Arc::new(Switch::default());
    let venue_hub = Arc::new(BroadcastHub::new(
        "bitget",
        source.clone() as Arc<dyn ViewSource>,
    ));
    let unified_hub = Arc::new(BroadcastHub::new(
        "all",
        Arc::new(UnifiedView::new(vec![source.clone() as Arc<dyn ViewSource>])),
    ));
    let hubs = DashboardHubs::new(unified_hub.clone()).with_venue(Venue::Bitget, venue_hub.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let state = AppState::new(hubs, config, shutdown.clone());
    tokio::spawn(serve(listener, state));

    Harness {
        base: format!("{addr}"),
        source,
        venue_hub,
        unified_hub,
        shutdown,
    }
}

async fn next_text<S>(ws: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("no frame in time")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return text.to_string();
        }
    }
}

#[tokio::test]
async fn test_viewer_gets_current_view_then_updates() {
    let h = start(DashboardConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/positions/bitget", h.base))
        .await
        .unwrap();

    assert_eq!(next_text(&mut ws).await, SENTINEL);

    h.source.open();
    h.venue_hub.publish();

    let value: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
    assert_eq!(value[0]["exchange"], "bitget");
    assert_eq!(value[0]["side"], "SHORT");
    assert_eq!(value[0]["pnl"], "15");
    assert!(value[0]["markPrice"].is_null());
}

#[tokio::test]
async fn test_unified_stream_and_rest_snapshot() {
    let h = start(DashboardConfig::default()).await;
    h.source.open();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/positions/all", h.base))
        .await
        .unwrap();
    let first: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
    assert_eq!(first.as_array().unwrap().len(), 1);

    let body = reqwest::get(format!("http://{}/api/positions", h.base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let rest: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(rest, first);

    let status = reqwest::get(format!("http://{}/api/positions/kraken", h.base))
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_hub_close_ends_viewer_socket() {
    let h = start(DashboardConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/positions/bitget", h.base))
        .await
        .unwrap();
    next_text(&mut ws).await;

    h.venue_hub.close_all();

    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn test_connection_limit() {
    let h = start(DashboardConfig {
        max_connections: 1,
        ..DashboardConfig::default()
    })
    .await;
    let url = format!("ws://{}/ws/positions/all", h.base);

    let (mut first, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    next_text(&mut first).await;

    assert!(tokio_tungstenite::connect_async(&url).await.is_err());
    assert_eq!(h.unified_hub.viewer_count(), 1);
}

#[tokio::test]
async fn test_basic_auth_required() {
    let h = start(DashboardConfig {
        username: "ops".to_string(),
        password: "s3cret".to_string(),
        ..DashboardConfig::default()
    })
    .await;
    let client = reqwest::Client::new();

    let denied = client
        .get(format!("http://{}/api/positions", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

    let allowed = client
        .get(format!("http://{}/api/positions", h.base))
        .basic_auth("ops", Some("s3cret"))
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), reqwest::StatusCode::OK);
    assert_eq!(allowed.text().await.unwrap(), SENTINEL);

    let health = client
        .get(format!("http://{}/healthz", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn test_shutdown_closes_viewers() {
    let h = start(DashboardConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/positions/all", h.base))
        .await
        .unwrap();
    next_text(&mut ws).await;

    h.shutdown.cancel();

    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
