//! Document service.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{
    BuyerId, ContractTerms, DocType, DocumentId, DocumentStatus, SignMethod, SignerType, UserId,
};
use serde::Serialize;
use store::{
    Document, DocumentFilter, DocumentSignature, DocumentStore, DocumentWrite, NewDocument,
    NewSignature, SalesStore, SigningLinkWrite, SnapshotRef, TokenState, constraint,
};

use super::render::{self, PdfFile, PdfRenderer};
use super::signing::{
    BUYER_CONSENT_TEXT, EXECUTION_CONSENT_TEXT, SignatureSubmission, SigningError, generate_token,
    hash_token,
};
use super::snapshots::{SnapshotError, SnapshotStorage, snapshot_key};
use super::{DocumentError, terms};
use crate::error::DomainError;

const MAX_TITLE_CHARS: usize = 200;
const SIGNED_SNAPSHOT_PREFIX: &str = "signed";

/// Tunables for the document service.
#[derive(Debug, Clone)]
pub struct DocumentSettings {
    /// How long a signing link stays valid.
    pub token_ttl: Duration,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            token_ttl: Duration::days(7),
        }
    }
}

/// Staff member acting on a document.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Option<UserId>,
    pub name: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct CreateDocument {
    pub buyer_id: BuyerId,
    pub doc_type: DocType,
    /// Defaults to the doc type's title.
    pub title: Option<String>,
    /// Defaults to the doc type's scaffold.
    pub terms: Option<ContractTerms>,
    /// Bumped past the latest version if already taken.
    pub version: Option<i32>,
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetails {
    pub document: Document,
    pub signatures: Vec<DocumentSignature>,
}

/// A freshly issued signing link. The token is only ever available here.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedLink {
    pub document: Document,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// What the public signing page shows.
#[derive(Debug, Clone, Serialize)]
pub struct SigningView {
    pub title: String,
    pub doc_type: DocType,
    pub version: i32,
    pub terms: ContractTerms,
    pub requires_email: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineEvent {
    Created,
    SigningLinkIssued,
    BuyerSigned {
        signer_name: String,
    },
    SignatureRecorded {
        signer_type: SignerType,
        signer_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TimelineEvent,
}

/// Service for the document lifecycle.
///
/// Every state change goes through [`DocumentStore::update_document`], so the
/// checks made before writing see the row as it is under lock.
pub struct DocumentService<S> {
    store: S,
    renderer: Arc<dyn PdfRenderer>,
    snapshots: Arc<dyn SnapshotStorage>,
    settings: DocumentSettings,
}

impl<S: DocumentStore + SalesStore> DocumentService<S> {
    pub fn new(
        store: S,
        renderer: Arc<dyn PdfRenderer>,
        snapshots: Arc<dyn SnapshotStorage>,
        settings: DocumentSettings,
    ) -> Self {
        Self {
            store,
            renderer,
            snapshots,
            settings,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a draft document for a buyer.
    #[tracing::instrument(skip(self, cmd), fields(buyer_id = %cmd.buyer_id, doc_type = %cmd.doc_type))]
    pub async fn create(&self, cmd: CreateDocument) -> Result<Document, DomainError> {
        let buyer = self
            .store
            .get_buyer(cmd.buyer_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Buyer", cmd.buyer_id))?;

        let title = cmd
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| cmd.doc_type.default_title().to_string());
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(DocumentError::TitleTooLong {
                max: MAX_TITLE_CHARS,
            }
            .into());
        }

        let terms = match cmd.terms {
            Some(terms) if terms.doc_type() != cmd.doc_type => {
                return Err(DocumentError::TermsDocTypeMismatch {
                    expected: cmd.doc_type,
                    found: terms.doc_type(),
                }
                .into());
            }
            Some(terms) => terms::validate(terms)?,
            None => terms::scaffold(cmd.doc_type, &buyer),
        };

        let document = self
            .store
            .insert_document(NewDocument {
                buyer_id: cmd.buyer_id,
                title,
                terms,
                requested_version: cmd.version,
                created_by: cmd.created_by,
            })
            .await?;

        metrics::counter!("documents_created").increment(1);
        tracing::info!(
            document_id = %document.id,
            version = document.version,
            "document created"
        );
        Ok(document)
    }

    pub async fn get(&self, id: DocumentId) -> Result<Document, DomainError> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Document", id))
    }

    pub async fn details(&self, id: DocumentId) -> Result<DocumentDetails, DomainError> {
        let document = self.get(id).await?;
        let signatures = self.store.signatures(id).await?;
        Ok(DocumentDetails {
            document,
            signatures,
        })
    }

    pub async fn list(&self, filter: DocumentFilter) -> Result<Vec<Document>, DomainError> {
        Ok(self.store.list_documents(filter).await?)
    }

    /// Replaces the terms of a draft.
    #[tracing::instrument(skip(self, terms))]
    pub async fn edit_terms(
        &self,
        id: DocumentId,
        terms: ContractTerms,
    ) -> Result<Document, DomainError> {
        let terms = terms::validate(terms)?;
        self.store
            .update_document(id, move |doc, _| {
                if !doc.status.accepts_edits() {
                    return Err(DocumentError::NotEditable(doc.status).into());
                }
                if doc.doc_type != terms.doc_type() {
                    return Err(DocumentError::TermsDocTypeMismatch {
                        expected: doc.doc_type,
                        found: terms.doc_type(),
                    }
                    .into());
                }
                let write = DocumentWrite {
                    terms: Some(terms),
                    ..DocumentWrite::default()
                };
                Ok::<_, DomainError>((write, ()))
            })
            .await?;

        tracing::info!(document_id = %id, "terms updated");
        self.get(id).await
    }

    /// Issues a new signing link, replacing any earlier one.
    #[tracing::instrument(skip(self))]
    pub async fn issue_signing_link(&self, id: DocumentId) -> Result<IssuedLink, DomainError> {
        let token = generate_token();
        let issued_at = Utc::now();
        let expires_at = issued_at + self.settings.token_ttl;
        let link = SigningLinkWrite::Issue {
            token_hash: hash_token(&token),
            issued_at,
            expires_at,
        };

        self.store
            .update_document(id, move |doc, _| {
                if !doc.status.accepts_signing_link() {
                    return Err(DocumentError::SigningLinkBlocked(doc.status).into());
                }
                let write = DocumentWrite {
                    signing_link: Some(link),
                    ..DocumentWrite::default()
                };
                Ok::<_, DomainError>((write, ()))
            })
            .await?;

        tracing::info!(document_id = %id, %expires_at, "signing link issued");
        Ok(IssuedLink {
            document: self.get(id).await?,
            token,
            expires_at,
        })
    }

    /// Looks up the document behind a public token and checks it can still be
    /// signed. Expiry is checked here; it never changes the stored status.
    pub async fn resolve_token(&self, token: &str) -> Result<Document, DomainError> {
        let (document, state) = self
            .store
            .find_by_token_hash(&hash_token(token))
            .await?
            .ok_or(SigningError::InvalidToken)?;
        check_signable(&document, state, Utc::now())?;
        Ok(document)
    }

    /// The public signing page for a token.
    #[tracing::instrument(skip_all)]
    pub async fn signing_view(&self, token: &str) -> Result<SigningView, DomainError> {
        let document = self.resolve_token(token).await?;
        Ok(SigningView {
            title: document.title,
            doc_type: document.doc_type,
            version: document.version,
            terms: document.terms,
            requires_email: document.doc_type.requires_signer_email(),
            expires_at: document.sign_token_expires_at,
        })
    }

    /// Records the buyer signature for a token.
    ///
    /// Status, expiry and existing signatures are checked again under the row
    /// lock, so of two concurrent submissions with the same token exactly one
    /// succeeds and the other answers "already signed". The token is retired in
    /// the same write. Export sales contracts get their signed snapshot right
    /// after the commit.
    #[tracing::instrument(skip_all)]
    pub async fn sign(
        &self,
        token: &str,
        submission: SignatureSubmission,
    ) -> Result<Document, DomainError> {
        match self.sign_with_token(token, submission).await {
            Ok(document) => {
                metrics::counter!("documents_signed").increment(1);
                tracing::info!(document_id = %document.id, "document signed by buyer");
                Ok(document)
            }
            Err(DomainError::Signing(err)) => {
                metrics::counter!("signing_rejected").increment(1);
                tracing::info!(reason = %err, "signing rejected");
                Err(err.into())
            }
            Err(err) => Err(err),
        }
    }

    async fn sign_with_token(
        &self,
        token: &str,
        submission: SignatureSubmission,
    ) -> Result<Document, DomainError> {
        let hash = hash_token(token);
        let (document, state) = self
            .store
            .find_by_token_hash(&hash)
            .await?
            .ok_or(SigningError::InvalidToken)?;
        check_signable(&document, state, Utc::now())?;
        let valid = submission.validate(document.doc_type)?;

        let signed_at = Utc::now();
        let result = self
            .store
            .update_document(document.id, move |doc, signatures| {
                let state = if doc.sign_token_hash.as_deref() == Some(hash.as_str()) {
                    TokenState::Active
                } else if doc.consumed_token_hash.as_deref() == Some(hash.as_str()) {
                    TokenState::Consumed
                } else {
                    return Err(SigningError::InvalidToken.into());
                };
                check_signable(doc, state, signed_at)?;
                if signatures.iter().any(|s| s.signer_type == SignerType::Buyer) {
                    return Err(SigningError::AlreadySigned.into());
                }

                let write = DocumentWrite {
                    status: Some(DocumentStatus::BuyerSigned),
                    signing_link: Some(SigningLinkWrite::Consume),
                    buyer_signed: Some(store::BuyerSigned {
                        at: signed_at,
                        name: valid.name.clone(),
                        email: valid.email.clone(),
                    }),
                    signature: Some(NewSignature {
                        signer_type: SignerType::Buyer,
                        sign_method: valid.method,
                        signer_name: valid.name,
                        signer_email: valid.email,
                        signer_user_id: None,
                        ip_address: valid.ip_address,
                        user_agent: valid.user_agent,
                        consent_text: BUYER_CONSENT_TEXT.to_string(),
                    }),
                    ..DocumentWrite::default()
                };
                Ok::<_, DomainError>((write, ()))
            })
            .await;

        match result {
            Ok(()) => {}
            Err(DomainError::Store(err)) if err.is_conflict_on(constraint::ONE_BUYER_SIGNATURE) => {
                return Err(SigningError::AlreadySigned.into());
            }
            Err(err) => return Err(err),
        }

        let signed = self.get(document.id).await?;
        if !signed.doc_type.snapshots_on_signing() {
            return Ok(signed);
        }
        match self.capture_snapshot(&signed).await {
            Ok(with_snapshot) => Ok(with_snapshot),
            Err(err) => {
                tracing::warn!(
                    document_id = %signed.id,
                    error = %err,
                    "signed snapshot failed, will retry on download"
                );
                Ok(signed)
            }
        }
    }

    /// Countersigns a buyer-signed document.
    #[tracing::instrument(skip(self, actor), fields(actor = %actor.name))]
    pub async fn execute(&self, id: DocumentId, actor: Actor) -> Result<Document, DomainError> {
        let name = actor.name.trim().to_string();
        if name.is_empty() {
            return Err(DocumentError::SignerNameRequired.into());
        }
        let signer_type = if actor.is_admin {
            SignerType::RizaraAdmin
        } else {
            SignerType::RizaraStaff
        };

        self.store
            .update_document(id, move |doc, _| {
                if doc.status != DocumentStatus::BuyerSigned {
                    return Err(DocumentError::InvalidTransition {
                        from: doc.status,
                        to: DocumentStatus::Executed,
                    }
                    .into());
                }
                let write = DocumentWrite {
                    status: Some(DocumentStatus::Executed),
                    signature: Some(NewSignature {
                        signer_type,
                        sign_method: SignMethod::Typed,
                        signer_name: name,
                        signer_email: None,
                        signer_user_id: actor.user_id,
                        ip_address: None,
                        user_agent: None,
                        consent_text: EXECUTION_CONSENT_TEXT.to_string(),
                    }),
                    ..DocumentWrite::default()
                };
                Ok::<_, DomainError>((write, ()))
            })
            .await?;

        metrics::counter!("documents_executed").increment(1);
        tracing::info!(document_id = %id, "document executed");
        self.get(id).await
    }

    /// Voids a document. Irreversible.
    #[tracing::instrument(skip(self))]
    pub async fn void(&self, id: DocumentId) -> Result<Document, DomainError> {
        let document = self.transition(id, DocumentStatus::Void).await?;
        metrics::counter!("documents_voided").increment(1);
        Ok(document)
    }

    /// Moves a document to `target` if the status table allows it.
    ///
    /// Moving to `buyer_signed` this way also retires the signing link.
    #[tracing::instrument(skip(self))]
    pub async fn transition(
        &self,
        id: DocumentId,
        target: DocumentStatus,
    ) -> Result<Document, DomainError> {
        self.store
            .update_document(id, move |doc, _| {
                if !doc.status.can_transition_to(target) {
                    return Err(DocumentError::InvalidTransition {
                        from: doc.status,
                        to: target,
                    }
                    .into());
                }
                let signing_link = (target == DocumentStatus::BuyerSigned
                    && doc.sign_token_hash.is_some())
                .then_some(SigningLinkWrite::Consume);
                let write = DocumentWrite {
                    status: Some(target),
                    signing_link,
                    ..DocumentWrite::default()
                };
                Ok::<_, DomainError>((write, ()))
            })
            .await?;

        tracing::info!(document_id = %id, status = %target, "document status changed");
        self.get(id).await
    }

    /// The document as a file.
    ///
    /// A stored snapshot is served verbatim. A signed document without one
    /// gets it rendered and stored now; anything else is rendered on the fly.
    #[tracing::instrument(skip(self))]
    pub async fn download(&self, id: DocumentId) -> Result<PdfFile, DomainError> {
        let mut document = self.get(id).await?;
        let filename = format!(
            "{}_{}_v{}.pdf",
            document.doc_type, document.id, document.version
        );

        let signed = matches!(
            document.status,
            DocumentStatus::BuyerSigned | DocumentStatus::Executed
        );
        if document.snapshot.is_none() && signed {
            document = self.capture_snapshot(&document).await?;
        }

        let bytes = match &document.snapshot {
            Some(snapshot) => self.snapshots.load(&snapshot.storage_key).await?,
            None => {
                let signatures = self.store.signatures(id).await?;
                self.renderer
                    .render(&render::document_html(&document, &signatures))
                    .await?
            }
        };

        Ok(PdfFile {
            filename,
            content_type: self.renderer.content_type(),
            bytes,
        })
    }

    /// Audit events for a document, oldest first.
    pub async fn timeline(&self, id: DocumentId) -> Result<Vec<TimelineEntry>, DomainError> {
        let document = self.get(id).await?;
        let signatures = self.store.signatures(id).await?;

        let mut entries = vec![TimelineEntry {
            at: document.created_at,
            event: TimelineEvent::Created,
        }];
        if let Some(at) = document.sign_token_issued_at {
            entries.push(TimelineEntry {
                at,
                event: TimelineEvent::SigningLinkIssued,
            });
        }
        if let (Some(at), Some(name)) = (document.buyer_signed_at, &document.buyer_signer_name) {
            entries.push(TimelineEntry {
                at,
                event: TimelineEvent::BuyerSigned {
                    signer_name: name.clone(),
                },
            });
        }
        entries.extend(signatures.into_iter().map(|s| TimelineEntry {
            at: s.signed_at,
            event: TimelineEvent::SignatureRecorded {
                signer_type: s.signer_type,
                signer_name: s.signer_name,
            },
        }));

        entries.sort_by_key(|e| e.at);
        Ok(entries)
    }

    /// Renders and stores the signed snapshot. A snapshot already recorded on
    /// the document is never replaced.
    async fn capture_snapshot(&self, document: &Document) -> Result<Document, DomainError> {
        let current = self.get(document.id).await?;
        if current.snapshot.is_some() {
            return Ok(current);
        }

        let signatures = self.store.signatures(document.id).await?;
        let html = render::document_html(&current, &signatures);
        let bytes = self.renderer.render(&html).await?;
        let key = snapshot_key(
            document.id,
            document.version,
            SIGNED_SNAPSHOT_PREFIX,
            Utc::now(),
        );
        let stored = match self.snapshots.store(&key, &bytes).await {
            Ok(stored) => stored,
            Err(SnapshotError::AlreadyExists(_)) => {
                let current = self.get(document.id).await?;
                if current.snapshot.is_some() {
                    return Ok(current);
                }
                return Err(SnapshotError::AlreadyExists(key).into());
            }
            Err(err) => return Err(err.into()),
        };
        let snapshot = SnapshotRef {
            storage_key: stored.storage_key,
            file_sha256: stored.sha256,
        };

        let recorded = self
            .store
            .update_document(document.id, move |doc, _| {
                let (write, recorded) = match doc.snapshot {
                    Some(_) => (DocumentWrite::default(), false),
                    None => (
                        DocumentWrite {
                            snapshot: Some(snapshot),
                            ..DocumentWrite::default()
                        },
                        true,
                    ),
                };
                Ok::<_, DomainError>((write, recorded))
            })
            .await?;

        if recorded {
            tracing::info!(document_id = %document.id, %key, "snapshot stored");
        } else {
            tracing::warn!(
                document_id = %document.id,
                orphaned_key = %key,
                "snapshot recorded concurrently, stored file left unreferenced"
            );
        }
        self.get(document.id).await
    }
}

/// Whether a document found by token can take a buyer signature at `now`.
fn check_signable(
    document: &Document,
    state: TokenState,
    now: DateTime<Utc>,
) -> Result<(), SigningError> {
    if state == TokenState::Consumed {
        return Err(SigningError::AlreadySigned);
    }
    match document.status {
        DocumentStatus::BuyerSigned | DocumentStatus::Executed => {
            return Err(SigningError::AlreadySigned);
        }
        DocumentStatus::Expired | DocumentStatus::Void => return Err(SigningError::Unavailable),
        DocumentStatus::Draft => {}
    }
    match document.sign_token_expires_at {
        Some(expires_at) if expires_at > now => Ok(()),
        _ => Err(SigningError::Expired),
    }
}
