//! PDF rendering port and the HTML templates fed to it.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use common::{ContractTerms, ExportContractTerms, LetterOfIntentTerms, Party};
use store::{Document, DocumentSignature};
use thiserror::Error;

use crate::sales::InvoiceView;

/// Company letterhead printed on every document.
pub mod letterhead {
    pub const COMPANY_NAME: &str = "Rizara Meats Ltd";
    pub const TAGLINE: &str = "Ethical • Traceable • Halal";
    pub const ADDRESS: &str = "P.O Box 25399-00100 Nairobi, Kenya";
    pub const EMAIL: &str = "sales@rizara.co.ke";
    pub const PHONES: &[&str] = &["+254-700-912-362", "+254-780-912-362"];
    pub const WEBSITE: &str = "www.rizara.co.ke";
    pub const COUNTRY: &str = "Kenya";
}

/// East Africa Time, used for printed dates.
const EAT_OFFSET_SECS: i32 = 3 * 3600;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("PDF service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("PDF service responded with status {0}")]
    Status(u16),
}

/// A rendered or stored file ready to be served.
#[derive(Debug, Clone)]
pub struct PdfFile {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Turns an HTML page into PDF bytes.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, html: &str) -> Result<Vec<u8>, RenderError>;

    /// Media type of what [`render`](Self::render) returns.
    fn content_type(&self) -> &'static str {
        "application/pdf"
    }
}

/// Renderer used when no PDF service is configured. Returns the HTML as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPassthroughRenderer;

#[async_trait]
impl PdfRenderer for HtmlPassthroughRenderer {
    async fn render(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        Ok(html.as_bytes().to_vec())
    }

    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }
}

/// Posts HTML to an external rendering service and returns the PDF it answers
/// with.
#[derive(Debug, Clone)]
pub struct HttpPdfRenderer {
    client: reqwest::Client,
    url: String,
}

impl HttpPdfRenderer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PdfRenderer for HttpPdfRenderer {
    #[tracing::instrument(skip(self, html), fields(url = %self.url, bytes = html.len()))]
    async fn render(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/html; charset=utf-8")
            .body(html.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "PDF service rejected render request");
            return Err(RenderError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Reference printed in the document header, e.g.
/// `EXPORT_SALES_CONTRACT / <id> / v1`.
pub fn doc_ref(document: &Document) -> String {
    format!(
        "{} / {} / v{}",
        document.doc_type.as_str().to_uppercase(),
        document.id,
        document.version
    )
}

/// Formats a timestamp as an East Africa Time date, e.g. `07 Mar 2025`.
pub fn eat_date(at: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(EAT_OFFSET_SECS) {
        Some(eat) => at.with_timezone(&eat).format("%d %b %Y").to_string(),
        None => at.format("%d %b %Y").to_string(),
    }
}

/// Escapes text for inclusion in HTML.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn header_html(title: &str, reference: &str, date: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head><body>\n\
         <header><h1>{company}</h1><p>{tagline}</p><p>{address}</p><p>{email} | {phones} | {website}</p></header>\n\
         <h2>{title}</h2><p class=\"ref\">Ref: {reference}</p><p class=\"date\">Date: {date}</p>\n",
        title = escape(title),
        company = letterhead::COMPANY_NAME,
        tagline = letterhead::TAGLINE,
        address = letterhead::ADDRESS,
        email = letterhead::EMAIL,
        phones = letterhead::PHONES.join(" / "),
        website = letterhead::WEBSITE,
        reference = escape(reference),
        date = escape(date),
    )
}

fn row(label: &str, value: &str) -> String {
    format!("<tr><th>{}</th><td>{}</td></tr>\n", escape(label), escape(value))
}

fn party_html(heading: &str, party: &Party) -> String {
    let mut html = format!("<h3>{}</h3><table>\n", escape(heading));
    html.push_str(&row("Name", &party.name));
    html.push_str(&row("Address", &party.address));
    html.push_str(&row("Country", &party.country));
    if let Some(email) = &party.email {
        html.push_str(&row("Email", email));
    }
    if let Some(phone) = &party.phone {
        html.push_str(&row("Phone", phone));
    }
    html.push_str("</table>\n");
    html
}

fn notes_html(notes: &str) -> String {
    if notes.trim().is_empty() {
        String::new()
    } else {
        format!("<h3>Notes</h3><p>{}</p>\n", escape(notes))
    }
}

fn loi_body(terms: &LetterOfIntentTerms) -> String {
    let mut html = party_html("Buyer", &terms.buyer);
    html.push_str(&party_html("Seller", &terms.seller));
    html.push_str("<h3>Product</h3><table>\n");
    html.push_str(&row("Product", &terms.product_name));
    html.push_str(&row("Specification", &terms.product_spec));
    html.push_str(&row("Quantity", &format!("{} kg", terms.quantity_kg)));
    html.push_str(&row("Price per kg", &terms.price_per_kg.format_with(&terms.currency)));
    html.push_str(&row("Incoterm", &terms.incoterm));
    html.push_str(&row(
        "Payment",
        &format!(
            "{}% advance, {}% balance",
            terms.payment.advance_percent, terms.payment.balance_percent
        ),
    ));
    if !terms.payment_notes.trim().is_empty() {
        html.push_str(&row("Payment notes", &terms.payment_notes));
    }
    if let Some(issue_date) = &terms.issue_date {
        html.push_str(&row("Issue date", issue_date));
    }
    html.push_str("</table>\n");
    html.push_str(&notes_html(&terms.notes));
    html
}

fn contract_body(terms: &ExportContractTerms) -> String {
    let mut html = party_html("Buyer", &terms.buyer);
    html.push_str(&party_html("Seller", &terms.seller));

    html.push_str("<h3>Product</h3><table>\n");
    let species = terms
        .product
        .species
        .map(|s| s.to_string())
        .unwrap_or_default();
    html.push_str(&row("Species", &species));
    html.push_str(&row("Description", &terms.product.description));
    html.push_str(&row("Quantity", &format!("{} kg", terms.product.quantity_kg)));
    html.push_str(&row("Packaging", &terms.product.packaging));
    html.push_str(&row("Specifications", &terms.product.specs));
    html.push_str("</table>\n");

    let currency = &terms.pricing.currency;
    html.push_str("<h3>Pricing</h3><table>\n");
    html.push_str(&row("Price per kg", &terms.pricing.price_per_kg.format_with(currency)));
    html.push_str(&row("Total value", &terms.pricing.total_value.format_with(currency)));
    html.push_str(&row("Incoterm", &terms.incoterm));
    if !terms.pricing.notes.trim().is_empty() {
        html.push_str(&row("Pricing notes", &terms.pricing.notes));
    }
    html.push_str("</table>\n");

    let payment = &terms.payment;
    html.push_str("<h3>Payment</h3><table>\n");
    html.push_str(&row("Advance", &format!("{}%", payment.split.advance_percent)));
    html.push_str(&row("Balance", &format!("{}%", payment.split.balance_percent)));
    html.push_str(&row("Balance condition", &payment.balance_condition));
    html.push_str(&row("Advance required", yes_no(payment.advance_required)));
    html.push_str(&row(
        "Balance due before shipment",
        yes_no(payment.balance_due_before_shipment),
    ));
    html.push_str(&row("Cash on delivery", yes_no(!payment.no_cod)));
    html.push_str(&row(
        "Payment after arrival",
        yes_no(!payment.no_payment_after_arrival),
    ));
    if !payment.notes.trim().is_empty() {
        html.push_str(&row("Payment notes", &payment.notes));
    }
    html.push_str("</table>\n");

    html.push_str("<h3>Law and disputes</h3><table>\n");
    html.push_str(&row("Governing law", &terms.governing_law));
    html.push_str(&row("Dispute resolution", &terms.dispute_resolution));
    html.push_str("</table>\n");
    html.push_str(&notes_html(&terms.notes));
    html
}

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}

fn signatures_html(signatures: &[DocumentSignature]) -> String {
    if signatures.is_empty() {
        return "<h3>Signatures</h3><p>Not yet signed.</p>\n".to_string();
    }
    let mut html = "<h3>Signatures</h3><table>\n".to_string();
    for signature in signatures {
        let mut value = format!(
            "{} ({}, {})",
            signature.signer_name,
            signature.sign_method,
            eat_date(signature.signed_at)
        );
        if let Some(email) = &signature.signer_email {
            value.push_str(&format!(" <{email}>"));
        }
        html.push_str(&row(&signature.signer_type.to_string(), &value));
    }
    html.push_str("</table>\n");
    html
}

/// Renders a contract document with its terms and signatures.
pub fn document_html(document: &Document, signatures: &[DocumentSignature]) -> String {
    let mut html = header_html(
        &document.title,
        &doc_ref(document),
        &eat_date(document.created_at),
    );
    html.push_str(&format!(
        "<p class=\"status\">Status: {}</p>\n",
        document.status
    ));
    html.push_str(&match &document.terms {
        ContractTerms::Loi(terms) => loi_body(terms),
        ContractTerms::ExportSalesContract(terms) => contract_body(terms),
    });
    html.push_str(&signatures_html(signatures));
    html.push_str("</body></html>\n");
    html
}

/// Renders a standard invoice.
pub fn invoice_html(view: &InvoiceView) -> String {
    let invoice = &view.invoice;
    let currency = &invoice.currency;
    let mut html = header_html(
        "Invoice",
        &invoice.invoice_number,
        &invoice.issue_date.format("%d %b %Y").to_string(),
    );

    html.push_str("<h3>Bill to</h3><table>\n");
    html.push_str(&row("Name", &view.buyer.name));
    for (label, value) in [
        ("Phone", &view.buyer.phone),
        ("Email", &view.buyer.email),
        ("Address", &view.buyer.address),
        ("Tax PIN", &view.buyer.tax_pin),
    ] {
        if let Some(value) = value {
            html.push_str(&row(label, value));
        }
    }
    html.push_str("</table>\n");

    html.push_str(
        "<table class=\"items\"><tr><th>Description</th><th>Qty</th><th>Unit price</th><th>Total</th></tr>\n",
    );
    for item in &view.items {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&item.description),
            item.quantity,
            escape(&item.unit_price.format_with(currency)),
            escape(&item.line_total.format_with(currency)),
        ));
    }
    html.push_str("</table>\n<table class=\"totals\">\n");
    html.push_str(&row("Subtotal", &invoice.subtotal.format_with(currency)));
    html.push_str(&row("Tax", &invoice.tax.format_with(currency)));
    html.push_str(&row("Total", &invoice.total.format_with(currency)));
    html.push_str(&row("Status", invoice.status.as_str()));
    html.push_str("</table>\n");

    if let Some(notes) = &invoice.notes {
        html.push_str(&notes_html(notes));
    }
    if let Some(terms) = &invoice.terms {
        html.push_str(&format!("<p class=\"terms\">{}</p>\n", escape(terms)));
    }
    html.push_str("</body></html>\n");
    html
}
