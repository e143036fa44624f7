//! Validated user input for outgoing operations.

use crate::error::{ChatError, Result};
use garde::Validate;
use serde::{Deserialize, Serialize};

/// Validation constants
const MAX_MESSAGE_LENGTH: usize = 10000;
const MAX_ATTACHMENTS: usize = 10;
const MAX_FILENAME_LENGTH: usize = 255;
const MAX_MIME_TYPE_LENGTH: usize = 127;
const MAX_SEARCH_QUERY_LENGTH: usize = 200;
const MAX_SEARCH_PAGE_SIZE: u32 = 50;

/// A file to upload alongside a message
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
#[garde(context(()))]
pub struct OutgoingAttachment {
    #[garde(length(min = 1, max = MAX_FILENAME_LENGTH))]
    pub filename: String,
    #[garde(length(min = 1, max = MAX_MIME_TYPE_LENGTH))]
    pub mime_type: String,
    #[garde(skip)]
    pub bytes: Vec<u8>,
}

/// Input for sending a message
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
#[garde(context(()))]
pub struct OutgoingMessage {
    #[garde(length(max = MAX_MESSAGE_LENGTH))]
    pub body: String,
    #[garde(length(max = MAX_ATTACHMENTS), dive)]
    pub attachments: Vec<OutgoingAttachment>,
}

impl OutgoingMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn check(&self) -> Result<()> {
        self.validate_input()?;
        if self.body.trim().is_empty() && self.attachments.is_empty() {
            return Err(ChatError::Validation(
                "message needs text or at least one attachment".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input for editing a message
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
#[garde(context(()))]
pub struct EditInput {
    #[garde(length(min = 1, max = MAX_MESSAGE_LENGTH))]
    pub body: String,
}

impl EditInput {
    pub fn check(&self) -> Result<()> {
        self.validate_input()?;
        if self.body.trim().is_empty() {
            return Err(ChatError::Validation("message text cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSort {
    #[default]
    Date,
    Relevance,
}

impl SearchSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSort::Date => "date",
            SearchSort::Relevance => "relevance",
        }
    }
}

/// Input for searching messages in a scope
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
#[garde(context(()))]
pub struct SearchQuery {
    #[garde(length(min = 1, max = MAX_SEARCH_QUERY_LENGTH))]
    pub query: String,
    #[garde(range(min = 1))]
    pub page: u32,
    #[garde(range(min = 1, max = MAX_SEARCH_PAGE_SIZE))]
    pub per_page: u32,
    #[garde(skip)]
    pub sort: SearchSort,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            page: 1,
            per_page: 20,
            sort: SearchSort::Date,
        }
    }
}

/// Helper trait to convert garde validation errors to `ChatError`
pub trait ValidateExt {
    fn validate_input(&self) -> Result<()>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<()> {
        self.validate().map_err(ChatError::from)
    }
}
