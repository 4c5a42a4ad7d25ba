use std::time::Duration;
use tokio::sync::mpsc;
use tracing::error;

use crate::notification::{
    Event, EventType, NotificationError, Notifier, format_event,
};

const TELEGRAM_API_URL: &str = "https://api.telegram.org/bot";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_MESSAGE_LENGTH: usize = 4096;
const ASYNC_QUEUE_SIZE: usize = 100;

/// Конфигурация Telegram notifier
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Токен бота от BotFather
    pub bot_token: String,
    /// ID чата для отправки уведомлений
    pub chat_id: String,
    /// Опциональный ID чата для ошибок
    pub error_chat_id: Option<String>,
    /// Включить уведомления об открытии позиций
    pub notify_entries: bool,
    /// Включить уведомления о закрытии позиций
    pub notify_exits: bool,
    /// Включить уведомления об усреднении
    pub notify_dca: bool,
    /// Включить уведомления о риск-ограничителях
    pub notify_risk: bool,
    /// Включить уведомления об ошибках
    pub notify_errors: bool,
    /// Включить периодические обзоры
    pub notify_overview: bool,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            error_chat_id: None,
            notify_entries: true,
            notify_exits: true,
            notify_dca: true,
            notify_risk: true,
            notify_errors: true,
            notify_overview: true,
        }
    }

    pub fn with_error_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.error_chat_id = Some(chat_id.into());
        self
    }

    /// Собирает конфигурацию из секции `notification.telegram`
    pub fn from_settings(settings: &crate::config::TelegramConfig) -> Self {
        let mut config = Self::new(settings.bot_token.clone(), settings.chat_id.clone());
        if !settings.error_chat_id.is_empty() {
            config = config.with_error_chat_id(settings.error_chat_id.clone());
        }
        config.notify_entries = settings.notify_entries;
        config.notify_exits = settings.notify_exits;
        config.notify_dca = settings.notify_dca;
        config.notify_risk = settings.notify_risk;
        config.notify_errors = settings.notify_errors;
        config.notify_overview = settings.notify_overview;
        config
    }

    /// Выбирает чат для события: ошибки уходят в отдельный чат, если он задан
    fn chat_for(&self, event_type: EventType) -> &str {
        if event_type == EventType::Error {
            self.error_chat_id.as_deref().unwrap_or(&self.chat_id)
        } else {
            &self.chat_id
        }
    }
}

/// Telegram Notifier для отправки уведомлений через Telegram Bot API
pub struct TelegramNotifier {
    config: TelegramConfig,
    http_client: reqwest::Client,
    api_url: String,
    sender: mpsc::Sender<Event>,
}

impl TelegramNotifier {
    /// Создает новый TelegramNotifier
    pub fn new(config: TelegramConfig) -> Result<Self, NotificationError> {
        if config.bot_token.is_empty() {
            return Err(NotificationError::new("bot_token is required"));
        }
        if config.chat_id.is_empty() {
            return Err(NotificationError::new("chat_id is required"));
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| NotificationError::new(format!("Failed to create HTTP client: {}", e)))?;

        let api_url = format!("{}{}", TELEGRAM_API_URL, config.bot_token);

        let (sender, receiver) = mpsc::channel(ASYNC_QUEUE_SIZE);

        let notifier = Self {
            config: config.clone(),
            http_client: http_client.clone(),
            api_url: api_url.clone(),
            sender,
        };

        // Запускаем воркер для асинхронной обработки
        Self::spawn_worker(receiver, config, http_client, api_url);

        Ok(notifier)
    }

    fn spawn_worker(
        mut receiver: mpsc::Receiver<Event>,
        config: TelegramConfig,
        http_client: reqwest::Client,
        api_url: String,
    ) {
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let chat_id = config.chat_for(event.event_type);

                let text = format_event(&event);
                if let Err(e) = Self::send_message_to_chat_static(
                    &http_client,
                    &api_url,
                    chat_id,
                    &text,
                )
                .await
                {
                    error!(error = %e, "Failed to send Telegram message");
                }
            }
        });
    }

    async fn send_message_to_chat(
        &self,
        chat_id: &str,
        text: &str,
    ) -> Result<(), NotificationError> {
        Self::send_message_to_chat_static(&self.http_client, &self.api_url, chat_id, text).await
    }

    async fn send_message_to_chat_static(
        http_client: &reqwest::Client,
        api_url: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<(), NotificationError> {
        let text = truncate_message(text);

        let url = format!("{}/sendMessage", api_url);

        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });

        let response = http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::new(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotificationError::new(format!(
                "Telegram API error: {} - {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, event: &Event) -> Result<(), NotificationError> {
        if !self.is_enabled(event.event_type) {
            return Ok(());
        }

        let chat_id = self.config.chat_for(event.event_type);

        let text = format_event(event);
        self.send_message_to_chat(chat_id, &text).await
    }

    fn send_async(&self, event: Event) {
        if !self.is_enabled(event.event_type) {
            return;
        }

        if let Err(e) = self.sender.try_send(event) {
            error!(error = %e, "Failed to queue Telegram message");
        }
    }

    fn is_enabled(&self, event_type: EventType) -> bool {
        match event_type {
            EventType::Startup | EventType::Shutdown => true,
            EventType::EntryOpened => self.config.notify_entries,
            EventType::PositionClosed => self.config.notify_exits,
            EventType::DcaExecuted => self.config.notify_dca,
            EventType::RiskWarning => self.config.notify_risk,
            EventType::Error => self.config.notify_errors,
            EventType::Overview => self.config.notify_overview,
        }
    }

    async fn close(&self) -> Result<(), NotificationError> {
        // Даем время воркеру обработать оставшиеся сообщения
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }
}

/// Обрезает сообщение до лимита Telegram, не разрывая UTF-8 символы
fn truncate_message(text: &str) -> &str {
    if text.len() <= MAX_MESSAGE_LENGTH {
        return text;
    }
    let mut end = MAX_MESSAGE_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
