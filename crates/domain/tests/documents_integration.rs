//! Integration tests for the document lifecycle and buyer signing.

use std::sync::Arc;

use chrono::Duration;
use common::{
    ContractTerms, DocType, DocumentStatus, MeatProduct, Money, PaymentSplit, SignMethod,
    SignerType,
};
use domain::documents::{scaffold, sha256_hex};
use domain::{
    Actor, CreateDocument, DocumentError, DocumentService, DocumentSettings, DomainError,
    HtmlPassthroughRenderer, InMemorySnapshotStorage, SignatureSubmission, SigningError,
    SnapshotStorage, TimelineEvent,
};
use store::{Buyer, DocumentFilter, DocumentStore, InMemoryStore, NewBuyer, SalesStore};

struct Fixture {
    service: DocumentService<InMemoryStore>,
    snapshots: InMemorySnapshotStorage,
    buyer: Buyer,
}

async fn fixture_with(settings: DocumentSettings) -> Fixture {
    let store = InMemoryStore::new();
    let snapshots = InMemorySnapshotStorage::new();
    let buyer = store
        .create_buyer(NewBuyer {
            name: "Gulf Foods LLC".to_string(),
            phone: None,
            email: Some("buying@gulffoods.example".to_string()),
            address: Some("Jebel Ali, Dubai".to_string()),
            tax_pin: None,
        })
        .await
        .unwrap();
    let service = DocumentService::new(
        store,
        Arc::new(HtmlPassthroughRenderer),
        Arc::new(snapshots.clone()),
        settings,
    );
    Fixture {
        service,
        snapshots,
        buyer,
    }
}

async fn fixture() -> Fixture {
    fixture_with(DocumentSettings::default()).await
}

fn create_cmd(buyer: &Buyer, doc_type: DocType) -> CreateDocument {
    CreateDocument {
        buyer_id: buyer.id,
        doc_type,
        title: None,
        terms: None,
        version: None,
        created_by: None,
    }
}

fn complete_contract(buyer: &Buyer) -> ContractTerms {
    let ContractTerms::ExportSalesContract(mut terms) =
        scaffold(DocType::ExportSalesContract, buyer)
    else {
        unreachable!()
    };
    terms.product.species = Some(MeatProduct::Goat);
    terms.product.quantity_kg = 2_000;
    terms.pricing.price_per_kg = Money::from_minor(720);
    terms.payment.balance_condition = "Against scanned bill of lading".to_string();
    ContractTerms::ExportSalesContract(terms)
}

fn submission() -> SignatureSubmission {
    SignatureSubmission {
        signer_name: "Omar Haddad".to_string(),
        signer_email: Some("omar@gulffoods.example".to_string()),
        consent: true,
        sign_method: None,
        ip_address: Some("197.232.1.10".to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
    }
}

fn admin() -> Actor {
    Actor {
        user_id: None,
        name: "Grace Njeri".to_string(),
        is_admin: true,
    }
}

mod creation {
    use super::*;

    #[tokio::test]
    async fn draft_gets_defaults() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::ExportSalesContract))
            .await
            .unwrap();

        assert_eq!(doc.status, DocumentStatus::Draft);
        assert_eq!(doc.version, 1);
        assert_eq!(doc.title, "Export Sales Contract");
        assert_eq!(doc.terms.doc_type(), DocType::ExportSalesContract);
        assert_eq!(doc.terms.buyer().name, "Gulf Foods LLC");
    }

    #[tokio::test]
    async fn taken_version_is_bumped() {
        let f = fixture().await;
        let mut cmd = create_cmd(&f.buyer, DocType::ExportSalesContract);
        cmd.version = Some(1);

        let first = f.service.create(cmd.clone()).await.unwrap();
        let second = f.service.create(cmd.clone()).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);

        // Versions are counted per (buyer, doc type).
        let loi = f
            .service
            .create(create_cmd(&f.buyer, DocType::Loi))
            .await
            .unwrap();
        assert_eq!(loi.version, 1);

        let contracts = f
            .service
            .list(DocumentFilter {
                doc_type: Some(DocType::ExportSalesContract),
                ..DocumentFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(contracts.len(), 2);
    }

    #[tokio::test]
    async fn mismatched_terms_and_long_titles_are_rejected() {
        let f = fixture().await;

        let mut cmd = create_cmd(&f.buyer, DocType::Loi);
        cmd.terms = Some(complete_contract(&f.buyer));
        assert!(matches!(
            f.service.create(cmd).await.unwrap_err(),
            DomainError::Document(DocumentError::TermsDocTypeMismatch { .. })
        ));

        let mut cmd = create_cmd(&f.buyer, DocType::Loi);
        cmd.title = Some("x".repeat(201));
        assert!(matches!(
            f.service.create(cmd).await.unwrap_err(),
            DomainError::Document(DocumentError::TitleTooLong { max: 200 })
        ));
    }

    #[tokio::test]
    async fn supplied_terms_are_validated_on_create() {
        let f = fixture().await;
        let ContractTerms::ExportSalesContract(mut bad) = complete_contract(&f.buyer) else {
            unreachable!()
        };
        bad.product.quantity_kg = -5;
        bad.pricing.price_per_kg = Money::from_minor(-720);
        bad.payment.split = PaymentSplit::new(30, 30);

        let mut cmd = create_cmd(&f.buyer, DocType::ExportSalesContract);
        cmd.terms = Some(ContractTerms::ExportSalesContract(bad));
        let err = f.service.create(cmd).await.unwrap_err();
        let DomainError::Document(DocumentError::InvalidTerms(problems)) = err else {
            panic!("expected invalid terms, got {err:?}");
        };
        assert!(problems.len() >= 3, "{problems:?}");
        assert!(
            f.service
                .list(DocumentFilter::default())
                .await
                .unwrap()
                .is_empty()
        );

        let mut cmd = create_cmd(&f.buyer, DocType::ExportSalesContract);
        cmd.terms = Some(complete_contract(&f.buyer));
        let doc = f.service.create(cmd).await.unwrap();
        let ContractTerms::ExportSalesContract(terms) = &doc.terms else {
            panic!("doc type changed");
        };
        assert_eq!(terms.pricing.total_value, Money::from_minor(1_440_000));
    }
}

mod editing {
    use super::*;

    #[tokio::test]
    async fn draft_terms_are_replaced_and_validated() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::ExportSalesContract))
            .await
            .unwrap();

        let updated = f
            .service
            .edit_terms(doc.id, complete_contract(&f.buyer))
            .await
            .unwrap();
        let ContractTerms::ExportSalesContract(terms) = &updated.terms else {
            panic!("doc type changed");
        };
        assert_eq!(terms.pricing.total_value, Money::from_minor(1_440_000));

        let ContractTerms::ExportSalesContract(mut bad) = complete_contract(&f.buyer) else {
            unreachable!()
        };
        bad.payment.split.advance_percent = 70;
        let err = f
            .service
            .edit_terms(doc.id, ContractTerms::ExportSalesContract(bad))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Document(DocumentError::InvalidTerms(_))
        ));

        // Rejected edits leave the stored terms alone.
        let stored = f.service.get(doc.id).await.unwrap();
        assert_eq!(stored.terms, updated.terms);
    }

    #[tokio::test]
    async fn editing_stops_after_signing() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::ExportSalesContract))
            .await
            .unwrap();
        f.service
            .edit_terms(doc.id, complete_contract(&f.buyer))
            .await
            .unwrap();
        let link = f.service.issue_signing_link(doc.id).await.unwrap();
        f.service.sign(&link.token, submission()).await.unwrap();

        let err = f
            .service
            .edit_terms(doc.id, complete_contract(&f.buyer))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Document(DocumentError::NotEditable(DocumentStatus::BuyerSigned))
        ));
    }
}

mod signing {
    use super::*;

    #[tokio::test]
    async fn buyer_signs_with_link() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::ExportSalesContract))
            .await
            .unwrap();
        f.service
            .edit_terms(doc.id, complete_contract(&f.buyer))
            .await
            .unwrap();

        let link = f.service.issue_signing_link(doc.id).await.unwrap();
        assert!(link.document.sign_token_hash.is_some());
        assert_ne!(link.document.sign_token_hash.as_deref(), Some(link.token.as_str()));

        let view = f.service.signing_view(&link.token).await.unwrap();
        assert_eq!(view.title, "Export Sales Contract");
        assert!(view.requires_email);

        let signed = f.service.sign(&link.token, submission()).await.unwrap();
        assert_eq!(signed.status, DocumentStatus::BuyerSigned);
        assert_eq!(signed.sign_token_hash, None);
        assert_eq!(signed.buyer_signer_name.as_deref(), Some("Omar Haddad"));
        assert!(signed.buyer_signed_at.is_some());

        let details = f.service.details(doc.id).await.unwrap();
        assert_eq!(details.signatures.len(), 1);
        let signature = &details.signatures[0];
        assert_eq!(signature.signer_type, SignerType::Buyer);
        assert_eq!(signature.sign_method, SignMethod::Typed);
        assert_eq!(signature.ip_address.as_deref(), Some("197.232.1.10"));
    }

    #[tokio::test]
    async fn used_token_answers_already_signed() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::Loi))
            .await
            .unwrap();
        let link = f.service.issue_signing_link(doc.id).await.unwrap();
        f.service.sign(&link.token, submission()).await.unwrap();

        let err = f.service.sign(&link.token, submission()).await.unwrap_err();
        assert!(matches!(err, DomainError::Signing(SigningError::AlreadySigned)));
        let err = f.service.signing_view(&link.token).await.unwrap_err();
        assert!(matches!(err, DomainError::Signing(SigningError::AlreadySigned)));

        let details = f.service.details(doc.id).await.unwrap();
        assert_eq!(details.signatures.len(), 1);
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let f = fixture().await;
        let err = f.service.signing_view("not-a-token").await.unwrap_err();
        assert!(matches!(err, DomainError::Signing(SigningError::InvalidToken)));
    }

    #[tokio::test]
    async fn expired_token_leaves_document_untouched() {
        let f = fixture_with(DocumentSettings {
            token_ttl: Duration::seconds(-1),
        })
        .await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::Loi))
            .await
            .unwrap();
        let link = f.service.issue_signing_link(doc.id).await.unwrap();

        let err = f.service.sign(&link.token, submission()).await.unwrap_err();
        assert!(matches!(err, DomainError::Signing(SigningError::Expired)));

        let doc = f.service.get(doc.id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Draft);
        assert!(f.service.details(doc.id).await.unwrap().signatures.is_empty());
    }

    #[tokio::test]
    async fn export_contract_needs_signer_email() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::ExportSalesContract))
            .await
            .unwrap();
        let link = f.service.issue_signing_link(doc.id).await.unwrap();

        let no_email = SignatureSubmission {
            signer_email: None,
            ..submission()
        };
        let err = f.service.sign(&link.token, no_email).await.unwrap_err();
        assert!(matches!(err, DomainError::Signing(SigningError::Invalid(_))));
        assert_eq!(
            f.service.get(doc.id).await.unwrap().status,
            DocumentStatus::Draft
        );
    }

    #[tokio::test]
    async fn concurrent_submissions_sign_once() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::Loi))
            .await
            .unwrap();
        let link = f.service.issue_signing_link(doc.id).await.unwrap();

        let (a, b) = tokio::join!(
            f.service.sign(&link.token, submission()),
            f.service.sign(&link.token, submission()),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = if a.is_err() { a } else { b };
        assert!(matches!(
            loser.unwrap_err(),
            DomainError::Signing(SigningError::AlreadySigned)
        ));

        let buyers = f
            .service
            .store()
            .signatures(doc.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.signer_type == SignerType::Buyer)
            .count();
        assert_eq!(buyers, 1);
    }

    #[tokio::test]
    async fn link_cannot_be_issued_after_void() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::Loi))
            .await
            .unwrap();
        let link = f.service.issue_signing_link(doc.id).await.unwrap();
        f.service.void(doc.id).await.unwrap();

        assert!(matches!(
            f.service.issue_signing_link(doc.id).await.unwrap_err(),
            DomainError::Document(DocumentError::SigningLinkBlocked(DocumentStatus::Void))
        ));
        assert!(matches!(
            f.service.signing_view(&link.token).await.unwrap_err(),
            DomainError::Signing(SigningError::Unavailable)
        ));
    }
}

mod snapshots {
    use super::*;

    #[tokio::test]
    async fn export_contract_is_snapshotted_on_signing() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::ExportSalesContract))
            .await
            .unwrap();
        f.service
            .edit_terms(doc.id, complete_contract(&f.buyer))
            .await
            .unwrap();
        let link = f.service.issue_signing_link(doc.id).await.unwrap();

        let signed = f.service.sign(&link.token, submission()).await.unwrap();
        let snapshot = signed.snapshot.clone().expect("snapshot stored at signing");
        assert!(
            snapshot
                .storage_key
                .starts_with(&format!("documents/{}/v1/signed_", doc.id))
        );
        assert_eq!(f.snapshots.len().await, 1);

        let stored = f.snapshots.load(&snapshot.storage_key).await.unwrap();
        let file = f.service.download(doc.id).await.unwrap();
        assert_eq!(file.bytes, stored);
        let html = String::from_utf8(file.bytes).unwrap();
        assert!(html.contains("Omar Haddad"));
        assert!(html.contains(&format!("EXPORT_SALES_CONTRACT / {} / v1", doc.id)));

        // Executing later does not replace what the buyer signed.
        let executed = f.service.execute(doc.id, admin()).await.unwrap();
        assert_eq!(executed.snapshot, Some(snapshot));
        assert_eq!(f.snapshots.len().await, 1);
    }

    #[tokio::test]
    async fn letter_of_intent_is_snapshotted_lazily() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::Loi))
            .await
            .unwrap();

        let draft = f.service.download(doc.id).await.unwrap();
        assert!(draft.filename.starts_with("loi_"));
        assert!(f.snapshots.is_empty().await);

        let link = f.service.issue_signing_link(doc.id).await.unwrap();
        let signed = f.service.sign(&link.token, submission()).await.unwrap();
        assert!(signed.snapshot.is_none());

        f.service.download(doc.id).await.unwrap();
        assert_eq!(f.snapshots.len().await, 1);
        assert!(f.service.get(doc.id).await.unwrap().snapshot.is_some());
    }

    #[tokio::test]
    async fn concurrent_downloads_keep_the_recorded_snapshot_intact() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::Loi))
            .await
            .unwrap();
        let link = f.service.issue_signing_link(doc.id).await.unwrap();
        f.service.sign(&link.token, submission()).await.unwrap();

        let (a, b) = tokio::join!(f.service.download(doc.id), f.service.download(doc.id));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.bytes, b.bytes);

        let snapshot = f.service.get(doc.id).await.unwrap().snapshot.unwrap();
        let stored = f.snapshots.load(&snapshot.storage_key).await.unwrap();
        assert_eq!(sha256_hex(&stored), snapshot.file_sha256);
        assert_eq!(stored, a.bytes);

        f.service.execute(doc.id, admin()).await.unwrap();
        let again = f.service.download(doc.id).await.unwrap();
        assert_eq!(again.bytes, stored);
        assert_eq!(
            f.service.get(doc.id).await.unwrap().snapshot,
            Some(snapshot)
        );
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn execute_requires_buyer_signature() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::Loi))
            .await
            .unwrap();

        let err = f.service.execute(doc.id, admin()).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Document(DocumentError::InvalidTransition {
                from: DocumentStatus::Draft,
                to: DocumentStatus::Executed,
            })
        ));

        let link = f.service.issue_signing_link(doc.id).await.unwrap();
        f.service.sign(&link.token, submission()).await.unwrap();
        let staff = Actor {
            is_admin: false,
            ..admin()
        };
        let executed = f.service.execute(doc.id, staff).await.unwrap();
        assert_eq!(executed.status, DocumentStatus::Executed);

        let signatures = f.service.details(doc.id).await.unwrap().signatures;
        assert_eq!(signatures.len(), 2);
        assert_eq!(signatures[1].signer_type, SignerType::RizaraStaff);
        assert_eq!(signatures[1].consent_text, "Executed electronically by Rizara.");
    }

    #[tokio::test]
    async fn void_is_final() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::Loi))
            .await
            .unwrap();

        f.service.void(doc.id).await.unwrap();
        let err = f.service.void(doc.id).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Document(DocumentError::InvalidTransition {
                from: DocumentStatus::Void,
                to: DocumentStatus::Void,
            })
        ));
        assert_eq!(
            f.service.get(doc.id).await.unwrap().status,
            DocumentStatus::Void
        );
    }

    #[tokio::test]
    async fn transitions_follow_the_table() {
        let paths: [(DocumentStatus, &[DocumentStatus]); 4] = [
            (DocumentStatus::Draft, &[]),
            (DocumentStatus::BuyerSigned, &[DocumentStatus::BuyerSigned]),
            (
                DocumentStatus::Executed,
                &[DocumentStatus::BuyerSigned, DocumentStatus::Executed],
            ),
            (DocumentStatus::Void, &[DocumentStatus::Void]),
        ];

        for (current, path) in paths {
            for target in DocumentStatus::ALL.iter().copied() {
                let f = fixture().await;
                let doc = f
                    .service
                    .create(create_cmd(&f.buyer, DocType::Loi))
                    .await
                    .unwrap();
                for step in path {
                    f.service.transition(doc.id, *step).await.unwrap();
                }

                let result = f.service.transition(doc.id, target).await;
                assert_eq!(
                    result.is_ok(),
                    current.can_transition_to(target),
                    "{current} -> {target}"
                );
                let expected = if result.is_ok() { target } else { current };
                assert_eq!(f.service.get(doc.id).await.unwrap().status, expected);
            }
        }
    }

    #[tokio::test]
    async fn timeline_lists_events_in_order() {
        let f = fixture().await;
        let doc = f
            .service
            .create(create_cmd(&f.buyer, DocType::Loi))
            .await
            .unwrap();
        let link = f.service.issue_signing_link(doc.id).await.unwrap();
        f.service.sign(&link.token, submission()).await.unwrap();
        f.service.execute(doc.id, admin()).await.unwrap();

        let timeline = f.service.timeline(doc.id).await.unwrap();
        assert_eq!(timeline.first().map(|e| &e.event), Some(&TimelineEvent::Created));
        assert!(timeline.windows(2).all(|w| w[0].at <= w[1].at));
        assert!(timeline.iter().any(|e| e.event == TimelineEvent::SigningLinkIssued));
        assert!(timeline.iter().any(|e| matches!(
            &e.event,
            TimelineEvent::SignatureRecorded {
                signer_type: SignerType::RizaraAdmin,
                ..
            }
        )));
    }
}
