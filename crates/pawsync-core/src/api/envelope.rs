use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Error payloads come either as a bare string or as `{message, code}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Detailed(ErrorBody),
    Message(String),
}

/// Normalized response of every remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorPayload::Message(message.into())),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: PageMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    fn remote_error(error: Option<ErrorPayload>) -> SyncError {
        match error {
            Some(ErrorPayload::Detailed(body)) => SyncError::Remote {
                message: body.message,
                code: body.code,
            },
            Some(ErrorPayload::Message(message)) => SyncError::remote(message),
            None => SyncError::remote("Request failed"),
        }
    }

    /// Unwrap the payload, turning `success = false` into a remote error.
    pub fn into_result(self) -> Result<T, SyncError> {
        if !self.success {
            return Err(Self::remote_error(self.error));
        }
        self.data
            .ok_or_else(|| SyncError::remote_with_code("Response carried no data", "empty"))
    }

    /// For endpoints (delete) whose success carries no payload.
    pub fn into_unit(self) -> Result<(), SyncError> {
        if self.success {
            Ok(())
        } else {
            Err(Self::remote_error(self.error))
        }
    }

    pub fn into_page<I>(self) -> Result<Page<I>, SyncError>
    where
        T: IntoIterator<Item = I>,
    {
        let meta = self.meta;
        let records = self.into_result()?;
        Ok(Page {
            records: records.into_iter().collect(),
            meta,
        })
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Default)]
pub struct Page<T = Value> {
    pub records: Vec<T>,
    pub meta: Option<PageMeta>,
}
