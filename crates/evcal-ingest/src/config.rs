use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use evcal_adapters::{
    EventExtractor, LineConfig, LineNotifier, OpenAiConfig, OpenAiExtractor, ReplyNotifier,
};
use evcal_core::Clock;
use evcal_storage::{
    GoogleSheetsStore, HttpClientConfig, JsonFileTable, MemoryTable, SheetsConfig, TableStore,
};

pub const DEFAULT_SHEET_NAME: &str = "行事曆總表";

#[derive(Debug, Clone)]
pub enum StoreBackend {
    Sheets(SheetsConfig),
    File(PathBuf),
    Memory(String),
}

/// Runtime configuration, threaded explicitly into every component.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub line_channel_access_token: Option<String>,
    pub line_channel_secret: Option<String>,
    pub line_api_base_url: String,
    pub read_api_key: Option<String>,
    pub store: StoreBackend,
    pub http_timeout_secs: u64,
    pub utc_offset: FixedOffset,
    pub web_port: u16,
    pub user_agent: String,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let openai_api_key = get("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;

        let store = match or("EVCAL_STORE", "sheets").as_str() {
            "sheets" => StoreBackend::Sheets(SheetsConfig {
                spreadsheet_id: get("EVCAL_SPREADSHEET_ID")
                    .context("EVCAL_SPREADSHEET_ID is required when EVCAL_STORE=sheets")?,
                sheet_name: or("EVCAL_SHEET_NAME", DEFAULT_SHEET_NAME),
                access_token: get("GOOGLE_SHEETS_ACCESS_TOKEN")
                    .context("GOOGLE_SHEETS_ACCESS_TOKEN is required when EVCAL_STORE=sheets")?,
                base_url: or("GOOGLE_SHEETS_BASE_URL", "https://sheets.googleapis.com/v4"),
            }),
            "file" => StoreBackend::File(PathBuf::from(or(
                "EVCAL_TABLE_PATH",
                "./data/calendar.json",
            ))),
            "memory" => StoreBackend::Memory(or("EVCAL_SHEET_NAME", DEFAULT_SHEET_NAME)),
            other => bail!("unknown EVCAL_STORE backend {other:?} (expected sheets, file or memory)"),
        };

        let utc_offset_hours: i32 = or("EVCAL_UTC_OFFSET_HOURS", "8")
            .parse()
            .context("EVCAL_UTC_OFFSET_HOURS must be an integer")?;
        let utc_offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .with_context(|| format!("EVCAL_UTC_OFFSET_HOURS out of range: {utc_offset_hours}"))?;

        Ok(Self {
            openai_api_key,
            openai_model: or("OPENAI_MODEL", "gpt-4o"),
            openai_base_url: or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            line_channel_access_token: get("LINE_CHANNEL_ACCESS_TOKEN"),
            line_channel_secret: get("LINE_CHANNEL_SECRET"),
            line_api_base_url: or("LINE_API_BASE_URL", "https://api.line.me"),
            read_api_key: get("EVCAL_READ_API_KEY"),
            store,
            http_timeout_secs: or("EVCAL_HTTP_TIMEOUT_SECS", "60")
                .parse()
                .context("EVCAL_HTTP_TIMEOUT_SECS must be a whole number of seconds")?,
            utc_offset,
            web_port: or("EVCAL_WEB_PORT", "8000")
                .parse()
                .context("EVCAL_WEB_PORT must be a port number")?,
            user_agent: or("EVCAL_USER_AGENT", "evcal-bot/0.1"),
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn build_store(&self) -> Result<Arc<dyn TableStore>> {
        let store: Arc<dyn TableStore> = match &self.store {
            StoreBackend::Sheets(sheets) => Arc::new(
                GoogleSheetsStore::new(sheets.clone(), &self.http_client_config())
                    .context("building sheets client")?,
            ),
            StoreBackend::File(path) => Arc::new(JsonFileTable::new(path.clone())),
            StoreBackend::Memory(name) => Arc::new(MemoryTable::new(name.clone())),
        };
        Ok(store)
    }

    pub fn build_extractor(&self, clock: Arc<dyn Clock>) -> Result<Arc<dyn EventExtractor>> {
        let extractor = OpenAiExtractor::new(
            OpenAiConfig {
                api_key: self.openai_api_key.clone(),
                model: self.openai_model.clone(),
                base_url: self.openai_base_url.clone(),
                utc_offset: self.utc_offset,
            },
            &self.http_client_config(),
            clock,
        )
        .context("building extraction client")?;
        Ok(Arc::new(extractor))
    }

    pub fn build_notifier(&self) -> Result<Arc<dyn ReplyNotifier>> {
        let access_token = self
            .line_channel_access_token
            .clone()
            .context("LINE_CHANNEL_ACCESS_TOKEN is not set")?;
        let notifier = LineNotifier::new(
            LineConfig {
                access_token,
                base_url: self.line_api_base_url.clone(),
            },
            &self.http_client_config(),
        )
        .context("building reply client")?;
        Ok(Arc::new(notifier))
    }
}
