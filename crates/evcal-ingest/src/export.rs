use evcal_storage::{StoreError, TableStore};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const KEY_DIGEST_LABEL: &[u8] = b"evcal-read-api-key";

pub const UNAUTHORIZED_MESSAGE: &str = "未授權的訪問";

/// One data row keyed by header label, in header order. Empty cells and
/// columns with a blank header are left out.
pub type ExportRecord = Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<ExportRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExportResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

pub async fn export_rows(store: &dyn TableStore) -> Result<Vec<ExportRecord>, StoreError> {
    let snapshot = store.read_table().await?;
    let headers = snapshot.header_row();
    Ok(snapshot
        .data_rows()
        .iter()
        .map(|row| {
            headers
                .iter()
                .enumerate()
                .filter(|(_, header)| !header.trim().is_empty())
                .filter_map(|(j, header)| {
                    let value = row.get(j).filter(|v| !v.is_empty())?;
                    Some((header.clone(), JsonValue::String(value.clone())))
                })
                .collect()
        })
        .collect())
}

/// Key-gated read of every data row. A missing key or an unconfigured
/// server key never reaches the store.
pub async fn read_api(
    store: &dyn TableStore,
    expected_key: Option<&str>,
    provided_key: Option<&str>,
) -> ExportResponse {
    let authorized = match (expected_key, provided_key) {
        (Some(expected), Some(given)) if !expected.is_empty() => keys_match(expected, given),
        _ => false,
    };
    if !authorized {
        return ExportResponse::failure(UNAUTHORIZED_MESSAGE);
    }

    match export_rows(store).await {
        Ok(rows) => ExportResponse {
            success: true,
            data: Some(rows),
            message: None,
        },
        Err(err) => {
            warn!(error = %err, "reading table for export failed");
            ExportResponse::failure(format!("獲取資料時發生錯誤：{err}"))
        }
    }
}

/// Compares the keys through their HMAC tags so the comparison time does not
/// depend on where they first differ.
fn keys_match(expected: &str, given: &str) -> bool {
    let tag = |key: &str| {
        HmacSha256::new_from_slice(KEY_DIGEST_LABEL).map(|mut mac| {
            mac.update(key.as_bytes());
            mac
        })
    };
    let (Ok(expected), Ok(given)) = (tag(expected), tag(given)) else {
        return false;
    };
    given
        .verify_slice(&expected.finalize().into_bytes())
        .is_ok()
}
