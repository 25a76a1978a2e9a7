//! Mapping of raw catalog records onto [`NormalizedProduct`]
//!
//! Records arrive either as `{ "meta": {...}, "result": {...} }` envelopes or
//! as bare product objects. Every optional field is best effort: a missing or
//! oddly shaped value becomes `None`, never an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub const MAX_NAME_CHARS: usize = 255;
pub const UNKNOWN_PRODUCT_NAME: &str = "Unknown Product";
const PREFERRED_LOCALE: &str = "en";

/// One product row as persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedProduct {
    pub id: Option<String>,
    pub name: String,
    pub status: Option<String>,
    pub organization: Option<String>,
    pub brand: Option<String>,
    pub price_cents: Option<i64>,
    pub ean_gtin13: Option<String>,
    pub ean_gtin14: Option<String>,
    pub artg_id: Option<String>,
    pub pbs_code: Option<String>,
    pub snomed_mpp: Option<String>,
    pub category_code: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Upstream last-modified time; the change-detection watermark
    pub change_timestamp: Option<DateTime<Utc>>,
    /// The unwrapped product object
    pub raw: Value,
}

/// Normalize one decoded record.
pub fn normalize(record: &Value) -> NormalizedProduct {
    let product = record
        .get("result")
        .filter(|v| v.is_object())
        .unwrap_or(record);
    let meta = record.get("meta");

    NormalizedProduct {
        id: product.get("id").and_then(scalar_text),
        name: product_name(product.get("name")),
        status: product.get("status").and_then(scalar_text),
        organization: first_present(product, &["organizations", "organization"]),
        brand: first_present(product, &["brands", "brand"]),
        price_cents: price_cents(product),
        ean_gtin13: first_present(product, &["eanGtin13", "ean"]),
        ean_gtin14: first_present(product, &["eanGtin14"]),
        artg_id: first_present(product, &["artgId"]),
        pbs_code: first_present(product, &["pbsCode", "pbsCodes"]),
        snomed_mpp: first_present(product, &["snomedMpp"]),
        category_code: first_present(product, &["categoryCode", "publicCategories"]),
        created_at: meta.and_then(|m| m.get("createdAt")).and_then(unix_timestamp),
        change_timestamp: meta.and_then(|m| m.get("updatedAt")).and_then(unix_timestamp),
        raw: product.clone(),
    }
}

/// A plain string, or a locale map preferring `en` and otherwise the value
/// under the lexicographically smallest locale key.
fn product_name(value: Option<&Value>) -> String {
    let name = match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Object(locales)) => localized(locales),
        _ => None,
    };

    let name = name.unwrap_or_else(|| UNKNOWN_PRODUCT_NAME.to_string());
    match name.char_indices().nth(MAX_NAME_CHARS) {
        Some((cut, _)) => name[..cut].to_string(),
        None => name,
    }
}

fn localized(locales: &Map<String, Value>) -> Option<String> {
    if let Some(Value::String(s)) = locales.get(PREFERRED_LOCALE) {
        if !s.is_empty() {
            return Some(s.clone());
        }
    }
    // Map iteration order depends on serde_json features, so pick the key explicitly
    locales
        .iter()
        .filter_map(|(locale, v)| v.as_str().filter(|s| !s.is_empty()).map(|s| (locale, s)))
        .min_by_key(|(locale, _)| locale.as_str())
        .map(|(_, s)| s.to_string())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Text of a field that may be a scalar, a named object, or a list of either.
fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(first_text),
        Value::Object(obj) => obj
            .get("name")
            .and_then(|name| match name {
                Value::Object(locales) => localized(locales),
                other => scalar_text(other),
            })
            .or_else(|| obj.get("code").and_then(scalar_text))
            .or_else(|| obj.get("id").and_then(scalar_text)),
        other => scalar_text(other),
    }
}

fn first_present(product: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| product.get(*key))
        .find_map(first_text)
}

/// First non-null of public, pharmacist and manufacturer price, in cents.
fn price_cents(product: &Value) -> Option<i64> {
    ["publicPrice", "pharmacistPrice", "manufacturerPrice"]
        .iter()
        .filter_map(|key| product.get(*key))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|price| price.is_finite())
        .map(|price| (price * 100.0).round() as i64)
}

/// Unix seconds (integer, float, or numeric string) to a UTC timestamp.
fn unix_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !seconds.is_finite() {
        return None;
    }

    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}
