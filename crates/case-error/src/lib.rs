// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-error
//!
//! A unified error taxonomy shared by every case-engine crate. Library
//! crates return `Result<T, CaseError>`; `case-daemon` and `case-cli`
//! convert at the boundary into HTTP responses and process exit codes
//! respectively.
#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The broad category an [`ErrorCode`] belongs to, used for coarse routing
/// (does this surface as a user-facing Issue, an HTTP status, a retry, or a
/// fatal?).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    /// User-correctable: surfaced as an [`crate::ErrorCode`]-tagged Issue on
    /// the case, rendered by the chat adapter.
    Validation,
    /// The committee failed to reach quorum or a usable consensus.
    Committee,
    /// An external call failed in a way expected to self-resolve; absorbed
    /// by the submitter's retry policy.
    ExternalTransient,
    /// An external call failed in a way that will not self-resolve; the
    /// case transitions to `failed`.
    ExternalPermanent,
    /// A bug, storage conflict, or lease loss internal to the engine.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Committee => "committee",
            Self::ExternalTransient => "external_transient",
            Self::ExternalPermanent => "external_permanent",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The stable, enumerated error codes used across the case engine. Every
/// variant maps to exactly one [`ErrorCategory`] via [`ErrorCode::category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A formula marker was found in a plausible data region.
    FormulasBlocked,
    /// No customer could be extracted.
    MissingCustomer,
    /// Customer text matched more than one catalog entry.
    AmbiguousCustomer,
    /// Customer text matched no catalog entry.
    CustomerNotFound,
    /// A line item has no identifier.
    MissingItem,
    /// A line item matched more than one catalog entry.
    AmbiguousItem,
    /// A line item matched no catalog entry.
    ItemNotFound,
    /// `qty * price` does not reconcile with the extracted total.
    ArithmeticMismatch,
    /// A quantity failed to parse or was negative.
    InvalidQuantity,
    /// A price failed to parse or was negative.
    InvalidPrice,
    /// A GTIN failed length or check-digit validation.
    InvalidGtin,
    /// A canonical field has no column mapping.
    MissingRequiredField,
    /// No line items survived row extraction.
    NoLineItems,
    /// The workbook contained no usable rows.
    EmptySpreadsheet,
    /// Sheet selection was ambiguous.
    MultipleSheetCandidates,
    /// Header row selection was ambiguous.
    MultipleHeaderCandidates,
    /// The same item identifier appeared twice.
    DuplicateLineItem,
    /// The committee's valid votes did not converge.
    CommitteeDisagreement,
    /// Fewer than two valid committee votes were returned.
    CommitteeUnavailable,
    /// A result scored below the confidence floor.
    LowConfidence,
    /// A decode error in the workbook was unrecoverable.
    ParseFatal,
    /// The case's wait deadline expired.
    CaseExpired,
    /// Retries were exhausted without a successful submission.
    RetryExhausted,
    /// An external call failed transiently (network, 5xx, 429).
    ExternalTransientFailure,
    /// An external call failed permanently (4xx other than 401/429).
    ExternalPermanentFailure,
    /// Token refresh failed.
    AuthFailed,
    /// A schema/contract validation failure internal to the engine.
    SchemaValidation,
    /// An optimistic-concurrency conflict on a store write.
    StorageConflict,
    /// A worker's lease on a case was lost or expired mid-transition.
    LeaseLost,
}

impl ErrorCode {
    /// The category this code belongs to.
    pub fn category(self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            FormulasBlocked
            | MissingCustomer
            | AmbiguousCustomer
            | CustomerNotFound
            | MissingItem
            | AmbiguousItem
            | ItemNotFound
            | ArithmeticMismatch
            | InvalidQuantity
            | InvalidPrice
            | InvalidGtin
            | MissingRequiredField
            | NoLineItems
            | EmptySpreadsheet
            | MultipleSheetCandidates
            | MultipleHeaderCandidates
            | DuplicateLineItem
            | ParseFatal
            | CaseExpired => ErrorCategory::Validation,
            CommitteeDisagreement | CommitteeUnavailable | LowConfidence => ErrorCategory::Committee,
            ExternalTransientFailure => ErrorCategory::ExternalTransient,
            ExternalPermanentFailure | RetryExhausted | AuthFailed => ErrorCategory::ExternalPermanent,
            SchemaValidation | StorageConflict | LeaseLost => ErrorCategory::Internal,
        }
    }

    /// The `SCREAMING_SNAKE_CASE` wire form of this code, matching its
    /// serde representation.
    pub fn as_str(self) -> &'static str {
        use ErrorCode::*;
        match self {
            FormulasBlocked => "FORMULAS_BLOCKED",
            MissingCustomer => "MISSING_CUSTOMER",
            AmbiguousCustomer => "AMBIGUOUS_CUSTOMER",
            CustomerNotFound => "CUSTOMER_NOT_FOUND",
            MissingItem => "MISSING_ITEM",
            AmbiguousItem => "AMBIGUOUS_ITEM",
            ItemNotFound => "ITEM_NOT_FOUND",
            ArithmeticMismatch => "ARITHMETIC_MISMATCH",
            InvalidQuantity => "INVALID_QUANTITY",
            InvalidPrice => "INVALID_PRICE",
            InvalidGtin => "INVALID_GTIN",
            MissingRequiredField => "MISSING_REQUIRED_FIELD",
            NoLineItems => "NO_LINE_ITEMS",
            EmptySpreadsheet => "EMPTY_SPREADSHEET",
            MultipleSheetCandidates => "MULTIPLE_SHEET_CANDIDATES",
            MultipleHeaderCandidates => "MULTIPLE_HEADER_CANDIDATES",
            DuplicateLineItem => "DUPLICATE_LINE_ITEM",
            CommitteeDisagreement => "COMMITTEE_DISAGREEMENT",
            CommitteeUnavailable => "COMMITTEE_UNAVAILABLE",
            LowConfidence => "LOW_CONFIDENCE",
            ParseFatal => "PARSE_FATAL",
            CaseExpired => "CASE_EXPIRED",
            RetryExhausted => "RETRY_EXHAUSTED",
            ExternalTransientFailure => "EXTERNAL_TRANSIENT_FAILURE",
            ExternalPermanentFailure => "EXTERNAL_PERMANENT_FAILURE",
            AuthFailed => "AUTH_FAILED",
            SchemaValidation => "SCHEMA_VALIDATION",
            StorageConflict => "STORAGE_CONFLICT",
            LeaseLost => "LEASE_LOST",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine's error type: a stable code, a human message, optional
/// structured context, and an optional source error preserved for `?`
/// propagation and logging (never serialized — see [`CaseErrorDto`]).
pub struct CaseError {
    code: ErrorCode,
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
    context: BTreeMap<String, serde_json::Value>,
}

impl CaseError {
    /// Builds a new error with no context or source.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// The error's code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The error's category, derived from its code.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Attaches a structured context field, consuming and returning `self`.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Attaches a source error, consuming and returning `self`.
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Debug for CaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("context", &self.context)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for CaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl StdError for CaseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

/// A serializable snapshot of a [`CaseError`], suitable for an audit event
/// payload or an HTTP error body. Drops the opaque `source` (never
/// serializable) and keeps everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseErrorDto {
    /// The error's code.
    pub code: ErrorCode,
    /// The human-readable message.
    pub message: String,
    /// Structured context fields.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl From<&CaseError> for CaseErrorDto {
    fn from(error: &CaseError) -> Self {
        Self {
            code: error.code,
            message: error.message.clone(),
            context: error.context.clone(),
        }
    }
}
