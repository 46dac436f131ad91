//! Lifecycle enums and their transition tables.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A string did not name a known variant of a vocabulary enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseVocabularyError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a snake_case string enum with `as_str`, `Display`, `FromStr` and `ALL`.
macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident as $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Returns the persisted/wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseVocabularyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseVocabularyError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

vocabulary! {
    /// Animal species. One entity type carries the discriminant instead of a
    /// table per species.
    Species as "species" {
        Goat => "goat",
        Sheep => "sheep",
        Cattle => "cattle",
    }
}

impl Species {
    /// Upper-case code used in animal identifiers, e.g. `GOAT`.
    pub fn code(&self) -> &'static str {
        match self {
            Species::Goat => "GOAT",
            Species::Sheep => "SHEEP",
            Species::Cattle => "CATTLE",
        }
    }
}

vocabulary! {
    /// Per-animal lifecycle state.
    ///
    /// ```text
    /// OnFarm ──► Aggregated ──► Processing ──► Processed ──► Sold
    /// ```
    ///
    /// Transitions are strictly forward and only happen as a side effect of a
    /// batch operation.
    AnimalStatus as "animal status" {
        OnFarm => "on_farm",
        Aggregated => "aggregated",
        Processing => "processing",
        Processed => "processed",
        Sold => "sold",
    }
}

impl AnimalStatus {
    /// Position in the pipeline, starting at zero for `OnFarm`.
    pub fn rank(&self) -> u8 {
        match self {
            AnimalStatus::OnFarm => 0,
            AnimalStatus::Aggregated => 1,
            AnimalStatus::Processing => 2,
            AnimalStatus::Processed => 3,
            AnimalStatus::Sold => 4,
        }
    }

    /// The single state that follows this one, if any.
    pub fn next(&self) -> Option<AnimalStatus> {
        match self {
            AnimalStatus::OnFarm => Some(AnimalStatus::Aggregated),
            AnimalStatus::Aggregated => Some(AnimalStatus::Processing),
            AnimalStatus::Processing => Some(AnimalStatus::Processed),
            AnimalStatus::Processed => Some(AnimalStatus::Sold),
            AnimalStatus::Sold => None,
        }
    }

    /// Returns true if `target` is reachable without going backwards.
    pub fn precedes(&self, target: AnimalStatus) -> bool {
        self.rank() < target.rank()
    }
}

impl Default for AnimalStatus {
    fn default() -> Self {
        AnimalStatus::OnFarm
    }
}

vocabulary! {
    /// Contract document lifecycle state.
    ///
    /// ```text
    /// Draft ──────► BuyerSigned ──────► Executed
    ///   │                │                 │
    ///   └────────────────┴─────────────────┴──► Void ◄── Expired
    /// ```
    DocumentStatus as "document status" {
        Draft => "draft",
        BuyerSigned => "buyer_signed",
        Executed => "executed",
        Expired => "expired",
        Void => "void",
    }
}

impl DocumentStatus {
    /// The explicit transition table.
    pub fn allowed_transitions(&self) -> &'static [DocumentStatus] {
        match self {
            DocumentStatus::Draft => &[DocumentStatus::BuyerSigned, DocumentStatus::Void],
            DocumentStatus::BuyerSigned => &[DocumentStatus::Executed, DocumentStatus::Void],
            DocumentStatus::Executed => &[DocumentStatus::Void],
            DocumentStatus::Expired => &[DocumentStatus::Void],
            DocumentStatus::Void => &[],
        }
    }

    /// Returns true if the table allows moving to `target`.
    pub fn can_transition_to(&self, target: DocumentStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Returns true for `Executed`, `Expired` and `Void`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Executed | DocumentStatus::Expired | DocumentStatus::Void
        )
    }

    /// Terms may only be edited while the document is a draft.
    pub fn accepts_edits(&self) -> bool {
        matches!(self, DocumentStatus::Draft)
    }

    /// A signing link is only useful while a buyer signature can still land.
    pub fn accepts_signing_link(&self) -> bool {
        self.can_transition_to(DocumentStatus::BuyerSigned)
    }
}

impl Default for DocumentStatus {
    fn default() -> Self {
        DocumentStatus::Draft
    }
}

vocabulary! {
    /// Invoice lifecycle state.
    InvoiceStatus as "invoice status" {
        Draft => "draft",
        Issued => "issued",
        Paid => "paid",
        Void => "void",
    }
}

impl InvoiceStatus {
    pub fn can_transition_to(&self, target: InvoiceStatus) -> bool {
        matches!(
            (self, target),
            (InvoiceStatus::Draft, InvoiceStatus::Issued)
                | (InvoiceStatus::Draft, InvoiceStatus::Void)
                | (InvoiceStatus::Issued, InvoiceStatus::Paid)
                | (InvoiceStatus::Issued, InvoiceStatus::Void)
        )
    }
}

vocabulary! {
    /// Who put a signature on a document.
    SignerType as "signer type" {
        Buyer => "buyer",
        RizaraAdmin => "rizara_admin",
        RizaraStaff => "rizara_staff",
    }
}

vocabulary! {
    /// How a signature was captured.
    SignMethod as "sign method" {
        Drawn => "drawn",
        Typed => "typed",
        Docusign => "docusign",
    }
}

vocabulary! {
    /// Kind of contract document.
    DocType as "document type" {
        /// Letter of intent.
        Loi => "loi",
        ExportSalesContract => "export_sales_contract",
    }
}

impl DocType {
    /// Title used when none is supplied.
    pub fn default_title(&self) -> &'static str {
        match self {
            DocType::Loi => "Letter of Intent",
            DocType::ExportSalesContract => "Export Sales Contract",
        }
    }

    /// Buyers must leave an email when signing this kind of document.
    pub fn requires_signer_email(&self) -> bool {
        matches!(self, DocType::ExportSalesContract)
    }

    /// An immutable PDF snapshot is captured when the buyer signs.
    pub fn snapshots_on_signing(&self) -> bool {
        matches!(self, DocType::ExportSalesContract)
    }
}

vocabulary! {
    /// Meat product offered under an export contract.
    MeatProduct as "product species" {
        Goat => "goat",
        Lamb => "lamb",
        Beef => "beef",
    }
}
