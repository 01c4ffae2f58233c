//! Message inspection and amount extraction
//!
//! Parses an RFC 5322 message with `mail-parser` and scans the subject
//! plus every `text/plain` part for advertised monetary figures. The
//! largest figure found drives the quarantine policy.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Metadata extracted from an APPENDed message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub sender: String,
    pub subject: String,
    /// Largest monetary figure found, 0 when none.
    pub amount: f64,
}

/// Keyword followed by a figure, within 10 non-digit characters.
/// The figure alternation accepts grouped thousands (`12,345.67`,
/// `1.234.567,89`) as well as plain decimals (`2500.00`, `1234,56`).
static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:amount|total|sum|subtotal|grand total)\D{0,10}((?:\d{1,3}(?:[.,]\d{3})+|\d+)[.,]\d{2,})",
    )
    .expect("amount pattern compiles")
});

/// Inspect raw message octets.
///
/// Never fails: an unparseable message yields empty headers, an empty
/// body, and amount 0, which the policy treats as deliverable.
#[must_use]
pub fn inspect(raw: &[u8]) -> MessageMeta {
    let Some(message) = mail_parser::MessageParser::default().parse(raw) else {
        return MessageMeta::default();
    };

    let sender = message
        .from()
        .and_then(|a| a.first())
        .map(|addr| {
            let address = addr.address().unwrap_or_default();
            match addr.name() {
                Some(name) => format!("{name} <{address}>"),
                None => address.to_string(),
            }
        })
        .unwrap_or_default();

    let subject = message.subject().unwrap_or_default().to_string();

    let mut body = String::new();
    for part in message.text_bodies() {
        if let Some(text) = part.text_contents() {
            body.push_str(text);
        }
    }
    if body.is_empty() {
        // Singleton HTML message: scan the markup as-is rather than
        // giving up on the body entirely.
        for part in message.html_bodies() {
            if let Some(text) = part.text_contents() {
                body.push_str(text);
            }
        }
    }

    let amount = extract_amount(&subject).max(extract_amount(&body));

    MessageMeta {
        sender,
        subject,
        amount,
    }
}

/// Largest advertised figure in `text`, 0 when none.
#[must_use]
pub fn extract_amount(text: &str) -> f64 {
    AMOUNT_RE
        .captures_iter(text)
        .filter_map(|caps| normalize_figure(&caps[1]))
        .fold(0.0, f64::max)
}

/// Reduce a captured figure to machine form. When both separators
/// appear, the later one is the decimal point; a lone comma is a
/// decimal comma.
fn normalize_figure(figure: &str) -> Option<f64> {
    let cleaned = match (figure.rfind('.'), figure.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => figure.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => figure.replace(',', ""),
        (None, Some(_)) => figure.replace(',', "."),
        _ => figure.to_string(),
    };
    cleaned.parse().ok()
}
