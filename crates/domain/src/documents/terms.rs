//! Scaffolds and validation for contract terms.

use chrono::Utc;
use common::{
    ContractPayment, ContractPricing, ContractProduct, ContractTerms, DocType,
    ExportContractTerms, LetterOfIntentTerms, Money, Party, PaymentSplit,
};
use store::Buyer;

use super::DocumentError;
use super::render::letterhead;

const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_INCOTERM: &str = "CIF";
const DEFAULT_PRODUCT: &str = "Halal Goat Meat";

fn seller() -> Party {
    Party {
        name: letterhead::COMPANY_NAME.to_string(),
        address: letterhead::ADDRESS.to_string(),
        country: letterhead::COUNTRY.to_string(),
        email: Some(letterhead::EMAIL.to_string()),
        phone: letterhead::PHONES.first().map(|p| p.to_string()),
    }
}

fn buyer_party(buyer: &Buyer) -> Party {
    Party {
        name: buyer.name.clone(),
        address: buyer.address.clone().unwrap_or_default(),
        country: String::new(),
        email: buyer.email.clone(),
        phone: buyer.phone.clone(),
    }
}

/// Starting terms for a new document, with the company as seller and the
/// buyer's contact details filled in.
pub fn scaffold(doc_type: DocType, buyer: &Buyer) -> ContractTerms {
    match doc_type {
        DocType::Loi => ContractTerms::Loi(LetterOfIntentTerms {
            buyer: buyer_party(buyer),
            seller: seller(),
            product_name: DEFAULT_PRODUCT.to_string(),
            product_spec: String::new(),
            quantity_kg: 0,
            price_per_kg: Money::zero(),
            currency: DEFAULT_CURRENCY.to_string(),
            incoterm: DEFAULT_INCOTERM.to_string(),
            payment: PaymentSplit::new(0, 100),
            payment_notes: String::new(),
            issue_date: Some(Utc::now().date_naive().to_string()),
            notes: String::new(),
        }),
        DocType::ExportSalesContract => ContractTerms::ExportSalesContract(ExportContractTerms {
            buyer: buyer_party(buyer),
            seller: seller(),
            incoterm: DEFAULT_INCOTERM.to_string(),
            governing_law: "Kenya".to_string(),
            dispute_resolution: "Negotiation, then arbitration".to_string(),
            product: ContractProduct {
                species: None,
                description: DEFAULT_PRODUCT.to_string(),
                quantity_kg: 0,
                packaging: "Chilled".to_string(),
                specs: String::new(),
            },
            pricing: ContractPricing {
                price_per_kg: Money::zero(),
                currency: DEFAULT_CURRENCY.to_string(),
                total_value: Money::zero(),
                notes: String::new(),
            },
            payment: ContractPayment {
                split: PaymentSplit::new(50, 50),
                balance_condition: String::new(),
                advance_required: true,
                balance_due_before_shipment: true,
                no_cod: true,
                no_payment_after_arrival: true,
                notes: String::new(),
            },
            notes: String::new(),
        }),
    }
}

/// Checks edited terms and returns them normalized: text trimmed and the
/// contract total recomputed from quantity and unit price.
///
/// Every problem found is reported, not just the first.
pub fn validate(terms: ContractTerms) -> Result<ContractTerms, DocumentError> {
    let mut problems = Vec::new();
    let terms = match terms {
        ContractTerms::Loi(mut t) => {
            t.incoterm = t.incoterm.trim().to_uppercase();
            t.currency = t.currency.trim().to_uppercase();
            t.product_name = t.product_name.trim().to_string();
            check_party("Buyer", &t.buyer, &mut problems);
            if t.product_name.is_empty() {
                problems.push("Product name is required".to_string());
            }
            check_common(
                &t.incoterm,
                &t.currency,
                t.quantity_kg,
                t.price_per_kg,
                t.payment,
                &mut problems,
            );
            ContractTerms::Loi(t)
        }
        ContractTerms::ExportSalesContract(mut t) => {
            t.incoterm = t.incoterm.trim().to_uppercase();
            t.pricing.currency = t.pricing.currency.trim().to_uppercase();
            t.payment.balance_condition = t.payment.balance_condition.trim().to_string();
            check_party("Buyer", &t.buyer, &mut problems);
            if t.product.species.is_none() {
                problems.push("Product species must be selected".to_string());
            }
            if t.product.description.trim().is_empty() {
                problems.push("Product description is required".to_string());
            }
            check_common(
                &t.incoterm,
                &t.pricing.currency,
                t.product.quantity_kg,
                t.pricing.price_per_kg,
                t.payment.split,
                &mut problems,
            );
            if t.payment.balance_condition.is_empty() {
                problems.push("Balance condition is required".to_string());
            }
            match t.pricing.price_per_kg.checked_multiply(t.product.quantity_kg) {
                Some(total) => t.pricing.total_value = total,
                None => problems.push("Contract value is too large".to_string()),
            }
            ContractTerms::ExportSalesContract(t)
        }
    };

    if problems.is_empty() {
        Ok(terms)
    } else {
        Err(DocumentError::InvalidTerms(problems))
    }
}

fn check_party(role: &str, party: &Party, problems: &mut Vec<String>) {
    if party.name.trim().is_empty() {
        problems.push(format!("{role} name is required"));
    }
}

fn check_common(
    incoterm: &str,
    currency: &str,
    quantity_kg: i64,
    price_per_kg: Money,
    payment: PaymentSplit,
    problems: &mut Vec<String>,
) {
    if incoterm.is_empty() {
        problems.push("Incoterm is required".to_string());
    }
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        problems.push("Currency must be a three-letter code".to_string());
    }
    if quantity_kg <= 0 {
        problems.push("Quantity must be greater than zero".to_string());
    }
    if !price_per_kg.is_positive() {
        problems.push("Price per kg must be greater than zero".to_string());
    }
    let in_range = |p: i32| (0..=100).contains(&p);
    if !in_range(payment.advance_percent) || !in_range(payment.balance_percent) {
        problems.push("Payment percentages must be between 0 and 100".to_string());
    } else if payment.advance_percent + payment.balance_percent != 100 {
        problems.push("Advance and balance percentages must add up to 100".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BuyerId, MeatProduct};

    fn buyer() -> Buyer {
        Buyer {
            id: BuyerId::new(7),
            name: "Gulf Foods LLC".to_string(),
            phone: None,
            email: Some("buying@gulf.example".to_string()),
            address: Some("Dubai".to_string()),
            tax_pin: None,
            created_at: Utc::now(),
        }
    }

    fn filled_contract() -> ContractTerms {
        let ContractTerms::ExportSalesContract(mut t) =
            scaffold(DocType::ExportSalesContract, &buyer())
        else {
            unreachable!()
        };
        t.product.species = Some(MeatProduct::Goat);
        t.product.quantity_kg = 1_000;
        t.pricing.price_per_kg = Money::from_minor(650);
        t.payment.balance_condition = "Against copy of bill of lading".to_string();
        ContractTerms::ExportSalesContract(t)
    }

    #[test]
    fn test_scaffold_fills_parties() {
        let terms = scaffold(DocType::Loi, &buyer());
        assert_eq!(terms.doc_type(), DocType::Loi);
        assert_eq!(terms.buyer().name, "Gulf Foods LLC");
        assert_eq!(terms.incoterm(), "CIF");
        let ContractTerms::Loi(loi) = terms else {
            unreachable!()
        };
        assert_eq!(loi.seller.name, letterhead::COMPANY_NAME);
        assert_eq!(loi.payment, PaymentSplit::new(0, 100));
    }

    #[test]
    fn test_blank_scaffold_does_not_validate() {
        let err = validate(scaffold(DocType::ExportSalesContract, &buyer())).unwrap_err();
        let DocumentError::InvalidTerms(problems) = err else {
            panic!("expected invalid terms");
        };
        assert!(problems.iter().any(|p| p.contains("species")));
        assert!(problems.iter().any(|p| p.contains("Quantity")));
        assert!(problems.iter().any(|p| p.contains("Price")));
        assert!(problems.iter().any(|p| p.contains("Balance condition")));
    }

    #[test]
    fn test_validate_recomputes_total() {
        let ContractTerms::ExportSalesContract(t) = validate(filled_contract()).unwrap() else {
            unreachable!()
        };
        assert_eq!(t.pricing.total_value, Money::from_minor(650_000));
    }

    #[test]
    fn test_percentages_must_sum_to_100() {
        let ContractTerms::ExportSalesContract(mut t) = filled_contract() else {
            unreachable!()
        };
        t.payment.split = PaymentSplit::new(60, 50);
        let err = validate(ContractTerms::ExportSalesContract(t)).unwrap_err();
        assert_eq!(
            err,
            DocumentError::InvalidTerms(vec![
                "Advance and balance percentages must add up to 100".to_string()
            ])
        );
    }

    #[test]
    fn test_incoterm_is_normalized_and_required() {
        let ContractTerms::ExportSalesContract(mut t) = filled_contract() else {
            unreachable!()
        };
        t.incoterm = " fob ".to_string();
        let terms = validate(ContractTerms::ExportSalesContract(t.clone())).unwrap();
        assert_eq!(terms.incoterm(), "FOB");

        t.incoterm = "  ".to_string();
        assert!(validate(ContractTerms::ExportSalesContract(t)).is_err());
    }
}
