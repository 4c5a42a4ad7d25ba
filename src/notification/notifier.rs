use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Тип события уведомления
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Открыта позиция
    EntryOpened,
    /// Позиция закрыта
    PositionClosed,
    /// Выполнено усреднение
    DcaExecuted,
    /// Сработал риск-ограничитель
    RiskWarning,
    /// Произошла ошибка
    Error,
    /// Бот запущен
    Startup,
    /// Бот остановлен
    Shutdown,
    /// Периодический обзор статистики
    Overview,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::EntryOpened => write!(f, "entry_opened"),
            EventType::PositionClosed => write!(f, "position_closed"),
            EventType::DcaExecuted => write!(f, "dca_executed"),
            EventType::RiskWarning => write!(f, "risk_warning"),
            EventType::Error => write!(f, "error"),
            EventType::Startup => write!(f, "startup"),
            EventType::Shutdown => write!(f, "shutdown"),
            EventType::Overview => write!(f, "overview"),
        }
    }
}

/// Данные об открытии позиции
#[derive(Debug, Clone)]
pub struct EntryData {
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub notional: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Данные о закрытии позиции
#[derive(Debug, Clone)]
pub struct ExitData {
    pub symbol: String,
    pub reason: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub fees: f64,
    pub holding_time: Duration,
}

/// Данные об усреднении
#[derive(Debug, Clone)]
pub struct DcaData {
    pub symbol: String,
    pub level: u32,
    pub quantity: f64,
    pub price: f64,
    pub average_entry_price: f64,
    pub total_quantity: f64,
    pub invested: f64,
}

/// Данные о срабатывании риск-ограничителя
#[derive(Debug, Clone)]
pub struct RiskWarningData {
    pub reason: String,
    pub daily_pnl: f64,
    pub consecutive_losses: u32,
}

/// Данные об ошибке
#[derive(Debug, Clone)]
pub struct ErrorData {
    pub component: String,
    pub message: String,
    pub error: Option<String>,
}

/// Данные о запуске бота
#[derive(Debug, Clone)]
pub struct StartupData {
    pub version: String,
    pub exchange: String,
    pub pairs: Vec<String>,
    pub open_positions: usize,
    pub dry_run: bool,
}

/// Данные об остановке бота
#[derive(Debug, Clone)]
pub struct ShutdownData {
    pub reason: String,
    pub uptime: Duration,
    pub graceful: bool,
}

/// Данные периодического обзора
#[derive(Debug, Clone)]
pub struct OverviewData {
    pub uptime: Duration,
    pub passes: u64,
    pub entries: u64,
    pub exits: u64,
    pub wins: u64,
    pub losses: u64,
    pub dca_adds: u64,
    pub realized_pnl: f64,
    pub open_positions: usize,
    /// Всего сделок в журнале; None если журнал отключен
    pub journaled_trades: Option<i64>,
    pub dry_run: bool,
}

/// Данные события
#[derive(Debug, Clone)]
pub enum EventData {
    EntryOpened(EntryData),
    PositionClosed(ExitData),
    DcaExecuted(DcaData),
    RiskWarning(RiskWarningData),
    Error(ErrorData),
    Startup(StartupData),
    Shutdown(ShutdownData),
    Overview(OverviewData),
}

/// Событие уведомления
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
}

impl Event {
    pub fn new(event_type: EventType, data: EventData) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn entry_opened(data: EntryData) -> Self {
        Self::new(EventType::EntryOpened, EventData::EntryOpened(data))
    }

    pub fn position_closed(data: ExitData) -> Self {
        Self::new(EventType::PositionClosed, EventData::PositionClosed(data))
    }

    pub fn dca_executed(data: DcaData) -> Self {
        Self::new(EventType::DcaExecuted, EventData::DcaExecuted(data))
    }

    pub fn risk_warning(data: RiskWarningData) -> Self {
        Self::new(EventType::RiskWarning, EventData::RiskWarning(data))
    }

    pub fn error(data: ErrorData) -> Self {
        Self::new(EventType::Error, EventData::Error(data))
    }

    pub fn startup(data: StartupData) -> Self {
        Self::new(EventType::Startup, EventData::Startup(data))
    }

    pub fn shutdown(data: ShutdownData) -> Self {
        Self::new(EventType::Shutdown, EventData::Shutdown(data))
    }

    pub fn overview(data: OverviewData) -> Self {
        Self::new(EventType::Overview, EventData::Overview(data))
    }
}

/// Трейт для отправки уведомлений
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Отправить уведомление синхронно
    async fn send(&self, event: &Event) -> Result<(), NotificationError>;

    /// Отправить уведомление асинхронно (без блокировки)
    fn send_async(&self, event: Event);

    /// Проверить, включены ли уведомления для данного типа событий
    fn is_enabled(&self, event_type: EventType) -> bool;

    /// Закрыть notifier
    async fn close(&self) -> Result<(), NotificationError>;
}

/// Ошибка уведомления
#[derive(Debug, Clone)]
pub struct NotificationError {
    pub message: String,
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotificationError: {}", self.message)
    }
}

impl std::error::Error for NotificationError {}

impl NotificationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// NoopNotifier - пустая реализация, когда каналы не настроены
pub struct NoopNotifier;

impl NoopNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _event: &Event) -> Result<(), NotificationError> {
        Ok(())
    }

    fn send_async(&self, _event: Event) {}

    fn is_enabled(&self, _event_type: EventType) -> bool {
        false
    }

    async fn close(&self) -> Result<(), NotificationError> {
        Ok(())
    }
}

// === Функции форматирования ===

/// Форматирует открытие позиции
pub fn format_entry(data: &EntryData) -> String {
    let base = parse_pair_base(&data.symbol);
    let pair_tag = format_pair_tag(&data.symbol);

    format!(
        "🟢 *Позиция открыта*\n\n\
         Пара: {} #{}\n\
         Количество: {:.6} {}\n\
         Цена входа: ${:.4}\n\
         Объём: *${:.2}*\n\n\
         🛑 Стоп: ${:.4}\n\
         🎯 Тейк: ${:.4}\n\n\
         ⏰ {}",
        data.symbol,
        pair_tag,
        data.quantity,
        base,
        data.price,
        data.notional,
        data.stop_loss,
        data.take_profit,
        Utc::now().format("%H:%M:%S UTC")
    )
}

/// Форматирует закрытие позиции
pub fn format_exit(data: &ExitData) -> String {
    let pair_tag = format_pair_tag(&data.symbol);
    let (icon, title) = if data.pnl >= 0.0 {
        ("✅", "Позиция закрыта в плюс")
    } else {
        ("❌", "Позиция закрыта в минус")
    };
    let pnl_percent = if data.entry_price > 0.0 {
        (data.exit_price - data.entry_price) / data.entry_price * 100.0
    } else {
        0.0
    };

    format!(
        "{} *{}*\n\n\
         Пара: {} #{}\n\
         Причина: {}\n\
         Количество: {:.6}\n\
         Вход: ${:.4} → Выход: ${:.4} ({:+.2}%)\n\
         Комиссии: ${:.2}\n\
         💰 PnL: *${:.2}*\n\
         Время в позиции: {}\n\n\
         ⏰ {}",
        icon,
        title,
        data.symbol,
        pair_tag,
        format_exit_reason(&data.reason),
        data.quantity,
        data.entry_price,
        data.exit_price,
        pnl_percent,
        data.fees,
        data.pnl,
        format_duration(data.holding_time),
        Utc::now().format("%H:%M:%S UTC")
    )
}

/// Форматирует усреднение
pub fn format_dca(data: &DcaData) -> String {
    let base = parse_pair_base(&data.symbol);
    let pair_tag = format_pair_tag(&data.symbol);

    format!(
        "🔵 *Усреднение #{}*\n\n\
         Пара: {} #{}\n\
         Докупка: {:.6} {} @ ${:.4}\n\
         Средняя цена: *${:.4}*\n\
         Всего: {:.6} {}\n\
         Вложено: ${:.2}\n\n\
         ⏰ {}",
        data.level,
        data.symbol,
        pair_tag,
        data.quantity,
        base,
        data.price,
        data.average_entry_price,
        data.total_quantity,
        base,
        data.invested,
        Utc::now().format("%H:%M:%S UTC")
    )
}

/// Форматирует срабатывание риск-ограничителя
pub fn format_risk_warning(data: &RiskWarningData) -> String {
    format!(
        "🚨 *Новые входы остановлены*\n\n\
         Причина: {}\n\
         PnL за день: *${:.2}*\n\
         Убытков подряд: {}\n\n\
         ⏰ {}",
        data.reason,
        data.daily_pnl,
        data.consecutive_losses,
        Utc::now().format("%H:%M:%S UTC")
    )
}

/// Форматирует ошибку
pub fn format_error(data: &ErrorData) -> String {
    let error_str = data
        .error
        .as_ref()
        .map(|e| format!("\nОшибка: {}", e))
        .unwrap_or_default();

    format!(
        "⚠️ *Ошибка*\n\n\
         Компонент: {}\n\
         Сообщение: {}{}\n\n\
         ⏰ {}",
        data.component,
        data.message,
        error_str,
        Utc::now().format("%H:%M:%S UTC")
    )
}

/// Форматирует запуск бота
pub fn format_startup(data: &StartupData) -> String {
    let mode = if data.dry_run {
        "🧪 DRY RUN"
    } else {
        "🚀 LIVE"
    };

    format!(
        "🤖 *Бот запущен*\n\n\
         Версия: {}\n\
         Режим: {}\n\
         Биржа: {}\n\
         Пары: {}\n\
         Открытых позиций: {}\n\n\
         ⏰ {}",
        data.version,
        mode,
        data.exchange,
        data.pairs.join(", "),
        data.open_positions,
        Utc::now().format("%H:%M:%S UTC")
    )
}

/// Форматирует остановку бота
pub fn format_shutdown(data: &ShutdownData) -> String {
    let status = if data.graceful {
        "✅ Graceful"
    } else {
        "⚠️ Forced"
    };

    format!(
        "🛑 *Бот остановлен*\n\n\
         Причина: {}\n\
         Статус: {}\n\
         Время работы: {}\n\n\
         ⏰ {}",
        data.reason,
        status,
        format_duration(data.uptime),
        Utc::now().format("%H:%M:%S UTC")
    )
}

/// Форматирует периодический обзор
pub fn format_overview(data: &OverviewData) -> String {
    let mode = if data.dry_run {
        "🧪 DRY RUN"
    } else {
        "🚀 LIVE"
    };
    let win_rate = if data.exits > 0 {
        data.wins as f64 / data.exits as f64 * 100.0
    } else {
        0.0
    };
    let journal = match data.journaled_trades {
        Some(count) => format!("📚 Сделок в журнале: {}\n", count),
        None => String::new(),
    };

    format!(
        "📊 *Обзор торговли* {}\n\n\
         ⏱ Время работы: {}\n\
         🔄 Циклов сканирования: {}\n\n\
         📥 Входов: {}\n\
         📤 Выходов: {} (✅ {} / ❌ {}, {:.0}%)\n\
         🔵 Усреднений: {}\n\
         📂 Открыто позиций: {}\n\
         {}\n\
         💰 Реализованный PnL: *${:.2}*\n\n\
         ⏰ {}",
        mode,
        format_duration(data.uptime),
        add_thousand_separators(data.passes),
        data.entries,
        data.exits,
        data.wins,
        data.losses,
        win_rate,
        data.dca_adds,
        data.open_positions,
        journal,
        data.realized_pnl,
        Utc::now().format("%H:%M:%S UTC")
    )
}

/// Форматирует событие в строку
pub fn format_event(event: &Event) -> String {
    match &event.data {
        EventData::EntryOpened(data) => format_entry(data),
        EventData::PositionClosed(data) => format_exit(data),
        EventData::DcaExecuted(data) => format_dca(data),
        EventData::RiskWarning(data) => format_risk_warning(data),
        EventData::Error(data) => format_error(data),
        EventData::Startup(data) => format_startup(data),
        EventData::Shutdown(data) => format_shutdown(data),
        EventData::Overview(data) => format_overview(data),
    }
}

// === Вспомогательные функции ===

/// Извлекает базовую валюту из пары (например, "BTC" из "BTC/USDT")
fn parse_pair_base(pair: &str) -> &str {
    pair.split('/').next().unwrap_or(pair)
}

/// Преобразует пару в формат хэштега (например, "BTC/USDT" -> "BTC\_USDT")
/// Underscore escaped for Telegram Markdown compatibility
fn format_pair_tag(pair: &str) -> String {
    pair.replace('/', "\\_")
}

/// Переводит причину выхода
fn format_exit_reason(reason: &str) -> &str {
    match reason {
        "stop_loss" => "стоп-лосс",
        "trailing_stop" => "трейлинг-стоп",
        "take_profit" => "тейк-профит",
        "reconciled" => "сверка с биржей",
        other => other,
    }
}

/// Форматирует длительность
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}с", secs)
    } else if secs < 3600 {
        format!("{}м {}с", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}ч {}м", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}д {}ч", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Добавляет разделители тысяч
fn add_thousand_separators(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
