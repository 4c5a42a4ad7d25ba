//! Tests for notification formatting functions.

use super::*;
use std::time::Duration;

// ==================== Helper function tests ====================

#[test]
fn test_parse_pair_base_btc_usdt() {
    assert_eq!(parse_pair_base("BTC/USDT"), "BTC");
}

#[test]
fn test_parse_pair_base_eth_btc() {
    assert_eq!(parse_pair_base("ETH/BTC"), "ETH");
}

#[test]
fn test_parse_pair_base_no_slash() {
    assert_eq!(parse_pair_base("BTCUSDT"), "BTCUSDT");
}

#[test]
fn test_parse_pair_base_empty() {
    assert_eq!(parse_pair_base(""), "");
}

#[test]
fn test_format_pair_tag_escapes_underscore() {
    // Underscore must be escaped for Telegram Markdown
    assert_eq!(format_pair_tag("BTC/USDT"), "BTC\\_USDT");
}

#[test]
fn test_format_pair_tag_eth_btc() {
    assert_eq!(format_pair_tag("ETH/BTC"), "ETH\\_BTC");
}

#[test]
fn test_format_pair_tag_no_slash() {
    // No slash means no underscore added
    assert_eq!(format_pair_tag("BTCUSDT"), "BTCUSDT");
}

#[test]
fn test_format_duration_seconds() {
    assert_eq!(format_duration(Duration::from_secs(45)), "45с");
}

#[test]
fn test_format_duration_minutes() {
    assert_eq!(format_duration(Duration::from_secs(125)), "2м 5с");
}

#[test]
fn test_format_duration_hours() {
    assert_eq!(format_duration(Duration::from_secs(3725)), "1ч 2м");
}

#[test]
fn test_format_duration_days() {
    assert_eq!(format_duration(Duration::from_secs(90000)), "1д 1ч");
}

#[test]
fn test_format_duration_zero() {
    assert_eq!(format_duration(Duration::ZERO), "0с");
}

#[test]
fn test_add_thousand_separators_small() {
    assert_eq!(add_thousand_separators(42), "42");
}

#[test]
fn test_add_thousand_separators_thousands() {
    assert_eq!(add_thousand_separators(1234), "1,234");
}

#[test]
fn test_add_thousand_separators_millions() {
    assert_eq!(add_thousand_separators(1234567), "1,234,567");
}

#[test]
fn test_add_thousand_separators_zero() {
    assert_eq!(add_thousand_separators(0), "0");
}

// ==================== Event formatting tests ====================

fn entry() -> EntryData {
    EntryData {
        symbol: "BTC/USDT".to_string(),
        quantity: 0.25,
        price: 42000.0,
        notional: 10500.0,
        stop_loss: 41000.0,
        take_profit: 45000.0,
    }
}

fn exit(pnl: f64) -> ExitData {
    ExitData {
        symbol: "ETH/USDT".to_string(),
        reason: "trailing_stop".to_string(),
        quantity: 1.5,
        entry_price: 2000.0,
        exit_price: 2100.0,
        pnl,
        fees: 1.23,
        holding_time: Duration::from_secs(5400),
    }
}

#[test]
fn test_format_entry_contains_pair_tag() {
    let msg = format_entry(&entry());

    // Check escaped underscore in hashtag
    assert!(msg.contains("#BTC\\_USDT"));
    assert!(msg.contains("0.250000 BTC"));
    assert!(msg.contains("$10500.00"));
    assert!(msg.contains("$41000.0000"));
}

#[test]
fn test_format_exit_profit() {
    let msg = format_exit(&exit(150.0));

    assert!(msg.contains("в плюс"));
    assert!(msg.contains("трейлинг-стоп"));
    assert!(msg.contains("+5.00%"));
    assert!(msg.contains("$150.00"));
    assert!(msg.contains("1ч 30м"));
}

#[test]
fn test_format_exit_loss() {
    let mut data = exit(-42.5);
    data.reason = "stop_loss".to_string();
    data.exit_price = 1950.0;

    let msg = format_exit(&data);

    assert!(msg.contains("в минус"));
    assert!(msg.contains("стоп-лосс"));
    assert!(msg.contains("-2.50%"));
}

#[test]
fn test_format_dca() {
    let data = DcaData {
        symbol: "SOL/USDT".to_string(),
        level: 2,
        quantity: 3.0,
        price: 90.0,
        average_entry_price: 95.0,
        total_quantity: 6.0,
        invested: 570.0,
    };

    let msg = format_dca(&data);

    assert!(msg.contains("Усреднение #2"));
    assert!(msg.contains("3.000000 SOL @ $90.0000"));
    assert!(msg.contains("$95.0000"));
    assert!(msg.contains("$570.00"));
}

#[test]
fn test_format_risk_warning() {
    let data = RiskWarningData {
        reason: "cooldown after 3 consecutive losses".to_string(),
        daily_pnl: -15.0,
        consecutive_losses: 3,
    };

    let msg = format_risk_warning(&data);

    assert!(msg.contains("остановлены"));
    assert!(msg.contains("cooldown after 3 consecutive losses"));
    assert!(msg.contains("$-15.00"));
}

#[test]
fn test_format_startup_dry_run() {
    let data = StartupData {
        version: "1.0.0".to_string(),
        exchange: "poloniex".to_string(),
        pairs: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
        open_positions: 2,
        dry_run: true,
    };

    let msg = format_startup(&data);

    assert!(msg.contains("DRY RUN"));
    assert!(msg.contains("1.0.0"));
    assert!(msg.contains("BTC/USDT, ETH/USDT"));
    assert!(msg.contains("Открытых позиций: 2"));
}

#[test]
fn test_format_startup_live() {
    let data = StartupData {
        version: "1.0.0".to_string(),
        exchange: "poloniex".to_string(),
        pairs: vec!["ETH/USDT".to_string()],
        open_positions: 0,
        dry_run: false,
    };

    let msg = format_startup(&data);

    assert!(msg.contains("LIVE"));
    assert!(!msg.contains("DRY RUN"));
}

#[test]
fn test_format_shutdown_graceful() {
    let data = ShutdownData {
        reason: "User requested".to_string(),
        uptime: Duration::from_secs(3600),
        graceful: true,
    };

    let msg = format_shutdown(&data);

    assert!(msg.contains("Graceful"));
    assert!(msg.contains("User requested"));
    assert!(msg.contains("1ч 0м"));
}

#[test]
fn test_format_shutdown_forced() {
    let data = ShutdownData {
        reason: "Error".to_string(),
        uptime: Duration::from_secs(60),
        graceful: false,
    };

    let msg = format_shutdown(&data);

    assert!(msg.contains("Forced"));
}

#[test]
fn test_format_error() {
    let data = ErrorData {
        component: "PositionLifecycle".to_string(),
        message: "enter BTC/USDT failed".to_string(),
        error: Some("Connection timeout".to_string()),
    };

    let msg = format_error(&data);

    assert!(msg.contains("PositionLifecycle"));
    assert!(msg.contains("enter BTC/USDT failed"));
    assert!(msg.contains("Connection timeout"));
}

#[test]
fn test_format_overview() {
    let data = OverviewData {
        uptime: Duration::from_secs(7200),
        passes: 1500,
        entries: 12,
        exits: 10,
        wins: 6,
        losses: 4,
        dca_adds: 3,
        realized_pnl: 150.75,
        open_positions: 2,
        journaled_trades: Some(42),
        dry_run: false,
    };

    let msg = format_overview(&data);

    assert!(msg.contains("LIVE"));
    assert!(msg.contains("2ч 0м"));
    assert!(msg.contains("1,500"));
    assert!(msg.contains("60%"));
    assert!(msg.contains("$150.75"));
    assert!(msg.contains("Сделок в журнале: 42"));
}

#[test]
fn test_format_exit_reason_passthrough() {
    assert_eq!(format_exit_reason("take_profit"), "тейк-профит");
    assert_eq!(format_exit_reason("manual"), "manual");
}

// ==================== Event constructor tests ====================

#[test]
fn test_event_entry_constructor() {
    let event = Event::entry_opened(entry());

    assert_eq!(event.event_type, EventType::EntryOpened);
    assert!(format_event(&event).contains("Позиция открыта"));
}

#[test]
fn test_event_error_constructor() {
    let data = ErrorData {
        component: "Test".to_string(),
        message: "Error".to_string(),
        error: None,
    };

    let event = Event::error(data);

    assert_eq!(event.event_type, EventType::Error);
}

#[test]
fn test_event_type_display() {
    assert_eq!(EventType::EntryOpened.to_string(), "entry_opened");
    assert_eq!(EventType::PositionClosed.to_string(), "position_closed");
    assert_eq!(EventType::DcaExecuted.to_string(), "dca_executed");
    assert_eq!(EventType::RiskWarning.to_string(), "risk_warning");
    assert_eq!(EventType::Error.to_string(), "error");
    assert_eq!(EventType::Startup.to_string(), "startup");
    assert_eq!(EventType::Shutdown.to_string(), "shutdown");
    assert_eq!(EventType::Overview.to_string(), "overview");
}

// ==================== Notifier composition tests ====================

#[tokio::test]
async fn test_noop_notifier_accepts_everything() {
    let n = NoopNotifier::new();
    assert!(!n.is_enabled(EventType::Error));
    assert!(n.send(&Event::entry_opened(entry())).await.is_ok());
    n.send_async(Event::entry_opened(entry()));
    assert!(n.close().await.is_ok());
}

