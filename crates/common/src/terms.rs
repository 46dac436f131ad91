//! Typed contract terms, one shape per document type.
//!
//! Terms are replaced wholesale on every edit; nothing mutates them in place.

use serde::{Deserialize, Serialize};

use crate::{DocType, MeatProduct, Money};

/// Name and contact block for either side of a contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Advance/balance split of the contract value, in whole percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub advance_percent: i32,
    pub balance_percent: i32,
}

impl PaymentSplit {
    pub fn new(advance_percent: i32, balance_percent: i32) -> Self {
        Self {
            advance_percent,
            balance_percent,
        }
    }
}

/// Terms of a letter of intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterOfIntentTerms {
    pub buyer: Party,
    pub seller: Party,
    pub product_name: String,
    #[serde(default)]
    pub product_spec: String,
    pub quantity_kg: i64,
    pub price_per_kg: Money,
    pub currency: String,
    pub incoterm: String,
    pub payment: PaymentSplit,
    #[serde(default)]
    pub payment_notes: String,
    /// ISO date the letter is dated.
    #[serde(default)]
    pub issue_date: Option<String>,
    #[serde(default)]
    pub notes: String,
}

/// Product block of an export sales contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractProduct {
    /// Must be selected before the terms validate.
    pub species: Option<MeatProduct>,
    pub description: String,
    pub quantity_kg: i64,
    #[serde(default)]
    pub packaging: String,
    #[serde(default)]
    pub specs: String,
}

/// Pricing block of an export sales contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractPricing {
    pub price_per_kg: Money,
    pub currency: String,
    /// Derived from quantity and unit price; recomputed on every edit.
    #[serde(default)]
    pub total_value: Money,
    #[serde(default)]
    pub notes: String,
}

/// Payment block of an export sales contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractPayment {
    #[serde(flatten)]
    pub split: PaymentSplit,
    pub balance_condition: String,
    #[serde(default)]
    pub advance_required: bool,
    #[serde(default)]
    pub balance_due_before_shipment: bool,
    #[serde(default)]
    pub no_cod: bool,
    #[serde(default)]
    pub no_payment_after_arrival: bool,
    #[serde(default)]
    pub notes: String,
}

/// Terms of an export sales contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportContractTerms {
    pub buyer: Party,
    pub seller: Party,
    pub incoterm: String,
    pub governing_law: String,
    pub dispute_resolution: String,
    pub product: ContractProduct,
    pub pricing: ContractPricing,
    pub payment: ContractPayment,
    #[serde(default)]
    pub notes: String,
}

/// Contract terms as a sum type over document types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "doc_type", rename_all = "snake_case")]
pub enum ContractTerms {
    Loi(LetterOfIntentTerms),
    ExportSalesContract(ExportContractTerms),
}

impl ContractTerms {
    /// The document type these terms belong to.
    pub fn doc_type(&self) -> DocType {
        match self {
            ContractTerms::Loi(_) => DocType::Loi,
            ContractTerms::ExportSalesContract(_) => DocType::ExportSalesContract,
        }
    }

    pub fn buyer(&self) -> &Party {
        match self {
            ContractTerms::Loi(t) => &t.buyer,
            ContractTerms::ExportSalesContract(t) => &t.buyer,
        }
    }

    pub fn incoterm(&self) -> &str {
        match self {
            ContractTerms::Loi(t) => &t.incoterm,
            ContractTerms::ExportSalesContract(t) => &t.incoterm,
        }
    }
}
