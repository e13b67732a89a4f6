//! Classifier for AITP-style structured interaction payloads embedded in
//! message content.
//!
//! A payload is a `$schema`-tagged JSON object whose variant key carries the
//! interaction body, e.g. `{"$schema": "...", "quote": {...}}`. Matching is
//! permissive: required fields are checked explicitly, unknown extra fields
//! ride along untouched, and anything that does not line up classifies as
//! [`Classification::Unrecognized`] rather than failing. Foreign and future
//! payload versions must degrade to raw structured display, never to an
//! error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_FIELD: &str = "$schema";

pub const DECISIONS_SCHEMA_URL: &str = "https://aitp.dev/v1/decisions/schema.json";
pub const DATA_SCHEMA_URL: &str = "https://aitp.dev/v1/data/schema.json";
pub const PAYMENTS_SCHEMA_URL: &str = "https://aitp.dev/v1/payments/schema.json";

const KNOWN_SCHEMA_URLS: [&str; 3] = [DECISIONS_SCHEMA_URL, DATA_SCHEMA_URL, PAYMENTS_SCHEMA_URL];

/// Variant keys in fixed match order. The first key present in the payload
/// wins; later keys are not consulted.
const VARIANT_KEY_ORDER: [&str; 4] = [
    "request_decision",
    "request_data",
    "quote",
    "payment_confirmation",
];

/// Outcome of classifying one structured content item.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Envelope(ProtocolEnvelope),
    /// Not an error: older or foreign payloads are valid, just unstructured.
    /// `diagnostic` is set when the payload claimed a known schema but its
    /// required fields did not hold up.
    Unrecognized {
        payload: Value,
        diagnostic: Option<String>,
    },
}

impl Classification {
    #[must_use]
    pub fn envelope(&self) -> Option<&ProtocolEnvelope> {
        match self {
            Self::Envelope(envelope) => Some(envelope),
            Self::Unrecognized { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEnvelope {
    RequestDecision(DecisionRequest),
    RequestData(DataRequest),
    Quote(Quote),
    PaymentConfirmation(PaymentConfirmation),
}

impl ProtocolEnvelope {
    #[must_use]
    pub fn variant(&self) -> &'static str {
        match self {
            Self::RequestDecision(_) => "request_decision",
            Self::RequestData(_) => "request_data",
            Self::Quote(_) => "quote",
            Self::PaymentConfirmation(_) => "payment_confirmation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Products,
    Checkbox,
    Radio,
    Confirmation,
}

impl DecisionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Checkbox => "checkbox",
            Self::Radio => "radio",
            Self::Confirmation => "confirmation",
        }
    }

    /// Unset or unknown `type` values default to radio.
    #[must_use]
    pub fn parse_or_radio(raw: Option<&str>) -> Self {
        match raw {
            Some("products") => Self::Products,
            Some("checkbox") => Self::Checkbox,
            Some("confirmation") => Self::Confirmation,
            _ => Self::Radio,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOption {
    pub name: String,
    pub price_usd: Option<f64>,
    pub five_star_rating: Option<f64>,
    pub image_url: Option<String>,
    pub url: Option<String>,
    pub variants: Vec<DecisionOption>,
}

impl DecisionOption {
    #[must_use]
    pub fn carries_price(&self) -> bool {
        self.price_usd.is_some() || self.variants.iter().any(DecisionOption::carries_price)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRequest {
    pub schema_url: String,
    /// The `type` the payload declared (radio when unset).
    pub declared_kind: DecisionKind,
    pub options: Vec<DecisionOption>,
    /// The full original payload, extra fields included.
    pub payload: Value,
}

impl DecisionRequest {
    /// Kind used for rendering routing. Known ambiguity inherited from the
    /// wire format: a price-bearing option shape wins over the declared
    /// `type`, so a radio decision whose options carry `price_usd` routes as
    /// products.
    #[must_use]
    pub fn routing_kind(&self) -> DecisionKind {
        if self.options.iter().any(DecisionOption::carries_price) {
            DecisionKind::Products
        } else {
            self.declared_kind
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataField {
    pub label: String,
    pub field_type: String,
    pub required: bool,
}

/// A form either inlines its field definitions or points at a remote
/// definition document; it must do at least one of the two.
#[derive(Debug, Clone, PartialEq)]
pub struct DataForm {
    pub fields: Vec<DataField>,
    pub json_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub schema_url: String,
    pub description: String,
    pub forms: Vec<DataForm>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentPlan {
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub schema_url: String,
    pub quote_id: String,
    pub payee_id: String,
    pub payment_plans: Vec<PaymentPlan>,
    pub valid_until: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentResult {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfirmation {
    pub schema_url: String,
    pub transaction_id: String,
    pub quote_id: String,
    pub result: PaymentResult,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Classifies a structured content item against the known envelope variants.
#[must_use]
pub fn classify(payload: &Value) -> Classification {
    let Some(object) = payload.as_object() else {
        return unrecognized(payload, None);
    };

    let Some(schema_url) = object.get(SCHEMA_FIELD).and_then(Value::as_str) else {
        return unrecognized(payload, None);
    };
    if !is_url(schema_url) {
        return unrecognized(payload, None);
    }
    let schema_url = schema_url.to_string();

    for key in VARIANT_KEY_ORDER {
        let Some(body) = object.get(key) else {
            continue;
        };
        let parsed = match key {
            "request_decision" => parse_request_decision(&schema_url, body, payload)
                .map(ProtocolEnvelope::RequestDecision),
            "request_data" => {
                parse_request_data(&schema_url, body, payload).map(ProtocolEnvelope::RequestData)
            }
            "quote" => parse_quote(&schema_url, body, payload).map(ProtocolEnvelope::Quote),
            _ => parse_payment_confirmation(&schema_url, body, payload)
                .map(ProtocolEnvelope::PaymentConfirmation),
        };
        return match parsed {
            Ok(envelope) => Classification::Envelope(envelope),
            Err(reason) => unrecognized(payload, Some(format!("{key}: {reason}"))),
        };
    }

    if KNOWN_SCHEMA_URLS.contains(&schema_url.as_str()) {
        return unrecognized(
            payload,
            Some(format!(
                "schema {schema_url} carries no known variant body"
            )),
        );
    }
    unrecognized(payload, None)
}

fn unrecognized(payload: &Value, diagnostic: Option<String>) -> Classification {
    Classification::Unrecognized {
        payload: payload.clone(),
        diagnostic,
    }
}

fn is_url(raw: &str) -> bool {
    raw.starts_with("https://") || raw.starts_with("http://")
}

fn parse_request_decision(
    schema_url: &str,
    body: &Value,
    payload: &Value,
) -> Result<DecisionRequest, String> {
    let body = body.as_object().ok_or("body must be an object")?;
    let declared_kind =
        DecisionKind::parse_or_radio(body.get("type").and_then(Value::as_str));
    let options = body
        .get("options")
        .and_then(Value::as_array)
        .ok_or("missing options")?
        .iter()
        .map(parse_decision_option)
        .collect::<Result<Vec<_>, _>>()?;

    if declared_kind == DecisionKind::Products {
        let missing = options
            .iter()
            .find(|option| !option.carries_price())
            .map(|option| option.name.clone());
        if let Some(name) = missing {
            return Err(format!("products option `{name}` has no price_usd"));
        }
    }

    Ok(DecisionRequest {
        schema_url: schema_url.to_string(),
        declared_kind,
        options,
        payload: payload.clone(),
    })
}

fn parse_decision_option(value: &Value) -> Result<DecisionOption, String> {
    let object = value.as_object().ok_or("option must be an object")?;
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .ok_or("option missing name")?
        .to_string();
    let variants = match object.get("variants").and_then(Value::as_array) {
        Some(values) => values
            .iter()
            .map(parse_decision_option)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok(DecisionOption {
        name,
        price_usd: object.get("price_usd").and_then(Value::as_f64),
        five_star_rating: object.get("five_star_rating").and_then(Value::as_f64),
        image_url: string_field(object, "image_url"),
        url: string_field(object, "url"),
        variants,
    })
}

fn parse_request_data(
    schema_url: &str,
    body: &Value,
    payload: &Value,
) -> Result<DataRequest, String> {
    let body = body.as_object().ok_or("body must be an object")?;
    let description = body
        .get("description")
        .and_then(Value::as_str)
        .ok_or("missing description")?
        .to_string();
    let forms = body
        .get("forms")
        .and_then(Value::as_array)
        .ok_or("missing forms")?
        .iter()
        .map(parse_data_form)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DataRequest {
        schema_url: schema_url.to_string(),
        description,
        forms,
        payload: payload.clone(),
    })
}

fn parse_data_form(value: &Value) -> Result<DataForm, String> {
    let object = value.as_object().ok_or("form must be an object")?;
    let json_url = string_field(object, "json_url");
    let fields = match object.get("fields").and_then(Value::as_array) {
        Some(values) => values
            .iter()
            .map(parse_data_field)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    if fields.is_empty() && json_url.is_none() {
        return Err("form has neither fields nor json_url".to_string());
    }
    Ok(DataForm { fields, json_url })
}

fn parse_data_field(value: &Value) -> Result<DataField, String> {
    let object = value.as_object().ok_or("field must be an object")?;
    let label = object
        .get("label")
        .and_then(Value::as_str)
        .ok_or("field missing label")?
        .to_string();
    let field_type = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or("field missing type")?
        .to_string();
    let required = object
        .get("required")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(DataField {
        label,
        field_type,
        required,
    })
}

fn parse_quote(schema_url: &str, body: &Value, payload: &Value) -> Result<Quote, String> {
    let body = body.as_object().ok_or("body must be an object")?;
    let quote_id = required_string(body, "quote_id")?;
    let payee_id = required_string(body, "payee_id")?;
    let payment_plans = body
        .get("payment_plans")
        .and_then(Value::as_array)
        .ok_or("missing payment_plans")?
        .iter()
        .map(parse_payment_plan)
        .collect::<Result<Vec<_>, _>>()?;
    let valid_until = required_datetime(body, "valid_until")?;
    Ok(Quote {
        schema_url: schema_url.to_string(),
        quote_id,
        payee_id,
        payment_plans,
        valid_until,
        payload: payload.clone(),
    })
}

fn parse_payment_plan(value: &Value) -> Result<PaymentPlan, String> {
    let object = value.as_object().ok_or("payment plan must be an object")?;
    let amount = object
        .get("amount")
        .and_then(Value::as_f64)
        .ok_or("payment plan missing amount")?;
    let currency = required_string(object, "currency")?;
    Ok(PaymentPlan { amount, currency })
}

fn parse_payment_confirmation(
    schema_url: &str,
    body: &Value,
    payload: &Value,
) -> Result<PaymentConfirmation, String> {
    let body = body.as_object().ok_or("body must be an object")?;
    let transaction_id = required_string(body, "transaction_id")?;
    let quote_id = required_string(body, "quote_id")?;
    let result = match body.get("result").and_then(Value::as_str) {
        Some("success") => PaymentResult::Success,
        Some("failure") => PaymentResult::Failure,
        Some(other) => return Err(format!("result `{other}` is not success|failure")),
        None => return Err("missing result".to_string()),
    };
    let timestamp = required_datetime(body, "timestamp")?;
    Ok(PaymentConfirmation {
        schema_url: schema_url.to_string(),
        transaction_id,
        quote_id,
        result,
        timestamp,
        payload: payload.clone(),
    })
}

fn string_field(
    object: &serde_json::Map<String, Value>,
    key: &str,
) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn required_string(
    object: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<String, String> {
    string_field(object, key).ok_or_else(|| format!("missing {key}"))
}

fn required_datetime(
    object: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<DateTime<Utc>, String> {
    let raw = object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing {key}"))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| format!("{key} is not an ISO datetime: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quote_with_required_fields_classifies() {
        let payload = json!({
            "$schema": PAYMENTS_SCHEMA_URL,
            "quote": {
                "quote_id": "q_1",
                "payee_id": "acme.near",
                "payment_plans": [{"amount": 12.5, "currency": "USD"}],
                "valid_until": "2026-09-01T00:00:00Z",
                "memo": "extra field rides along"
            }
        });
        match classify(&payload) {
            Classification::Envelope(ProtocolEnvelope::Quote(quote)) => {
                assert_eq!(quote.quote_id, "q_1");
                assert_eq!(quote.payee_id, "acme.near");
                assert_eq!(quote.payment_plans.len(), 1);
                assert_eq!(quote.payload, payload);
            }
            other => panic!("expected quote envelope, got {other:?}"),
        }
    }

    #[test]
    fn quote_missing_payment_plans_is_unrecognized_with_diagnostic() {
        let payload = json!({
            "$schema": PAYMENTS_SCHEMA_URL,
            "quote": {
                "quote_id": "q_1",
                "payee_id": "acme.near",
                "valid_until": "2026-09-01T00:00:00Z"
            }
        });
        match classify(&payload) {
            Classification::Unrecognized {
                payload: kept,
                diagnostic: Some(diagnostic),
            } => {
                assert_eq!(kept, payload);
                assert!(diagnostic.contains("payment_plans"), "got: {diagnostic}");
            }
            other => panic!("expected unrecognized with diagnostic, got {other:?}"),
        }
    }

    #[test]
    fn decision_request_defaults_to_radio() {
        let payload = json!({
            "$schema": DECISIONS_SCHEMA_URL,
            "request_decision": {
                "options": [{"name": "yes"}, {"name": "no"}]
            }
        });
        match classify(&payload) {
            Classification::Envelope(ProtocolEnvelope::RequestDecision(decision)) => {
                assert_eq!(decision.declared_kind, DecisionKind::Radio);
                assert_eq!(decision.routing_kind(), DecisionKind::Radio);
            }
            other => panic!("expected decision envelope, got {other:?}"),
        }
    }

    #[test]
    fn price_bearing_options_route_as_products_despite_declared_type() {
        let payload = json!({
            "$schema": DECISIONS_SCHEMA_URL,
            "request_decision": {
                "type": "radio",
                "options": [
                    {"name": "basic", "price_usd": 5.0},
                    {"name": "bundle", "variants": [{"name": "xl", "price_usd": 9.0}]}
                ]
            }
        });
        match classify(&payload) {
            Classification::Envelope(ProtocolEnvelope::RequestDecision(decision)) => {
                assert_eq!(decision.declared_kind, DecisionKind::Radio);
                assert_eq!(decision.routing_kind(), DecisionKind::Products);
            }
            other => panic!("expected decision envelope, got {other:?}"),
        }
    }

    #[test]
    fn declared_products_without_prices_is_unrecognized() {
        let payload = json!({
            "$schema": DECISIONS_SCHEMA_URL,
            "request_decision": {
                "type": "products",
                "options": [{"name": "mystery box"}]
            }
        });
        match classify(&payload) {
            Classification::Unrecognized {
                diagnostic: Some(diagnostic),
                ..
            } => {
                assert!(diagnostic.contains("mystery box"), "got: {diagnostic}");
            }
            other => panic!("expected unrecognized with diagnostic, got {other:?}"),
        }
    }

    #[test]
    fn request_data_accepts_inline_fields_or_remote_url() {
        let payload = json!({
            "$schema": DATA_SCHEMA_URL,
            "request_data": {
                "description": "shipping details",
                "forms": [
                    {"fields": [{"label": "Name", "type": "text", "required": true}]},
                    {"json_url": "https://example.com/fields.json"}
                ]
            }
        });
        match classify(&payload) {
            Classification::Envelope(ProtocolEnvelope::RequestData(data)) => {
                assert_eq!(data.description, "shipping details");
                assert_eq!(data.forms.len(), 2);
                assert!(data.forms[0].fields[0].required);
                assert_eq!(
                    data.forms[1].json_url.as_deref(),
                    Some("https://example.com/fields.json")
                );
            }
            other => panic!("expected data envelope, got {other:?}"),
        }
    }

    #[test]
    fn form_without_fields_or_url_is_unrecognized() {
        let payload = json!({
            "$schema": DATA_SCHEMA_URL,
            "request_data": {
                "description": "empty",
                "forms": [{}]
            }
        });
        assert!(matches!(
            classify(&payload),
            Classification::Unrecognized {
                diagnostic: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn payment_confirmation_classifies_and_validates_result() {
        let payload = json!({
            "$schema": PAYMENTS_SCHEMA_URL,
            "payment_confirmation": {
                "transaction_id": "tx_9",
                "quote_id": "q_1",
                "result": "success",
                "timestamp": "2026-08-30T12:00:00Z"
            }
        });
        match classify(&payload) {
            Classification::Envelope(ProtocolEnvelope::PaymentConfirmation(confirmation)) => {
                assert_eq!(confirmation.result, PaymentResult::Success);
                assert_eq!(confirmation.transaction_id, "tx_9");
            }
            other => panic!("expected confirmation envelope, got {other:?}"),
        }

        let bad = json!({
            "$schema": PAYMENTS_SCHEMA_URL,
            "payment_confirmation": {
                "transaction_id": "tx_9",
                "quote_id": "q_1",
                "result": "maybe",
                "timestamp": "2026-08-30T12:00:00Z"
            }
        });
        assert!(matches!(
            classify(&bad),
            Classification::Unrecognized {
                diagnostic: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn variant_match_order_is_fixed() {
        // Both keys present: request_decision is consulted first and wins.
        let payload = json!({
            "$schema": DECISIONS_SCHEMA_URL,
            "request_decision": {"options": [{"name": "a"}]},
            "quote": {
                "quote_id": "q_1",
                "payee_id": "p",
                "payment_plans": [{"amount": 1.0, "currency": "USD"}],
                "valid_until": "2026-09-01T00:00:00Z"
            }
        });
        match classify(&payload) {
            Classification::Envelope(envelope) => {
                assert_eq!(envelope.variant(), "request_decision");
            }
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[test]
    fn missing_or_non_url_schema_is_unrecognized_without_diagnostic() {
        for payload in [
            json!({"quote": {"quote_id": "q_1"}}),
            json!({"$schema": "not a url", "quote": {"quote_id": "q_1"}}),
            json!(["bare", "array"]),
            json!("just text"),
        ] {
            match classify(&payload) {
                Classification::Unrecognized {
                    payload: kept,
                    diagnostic: None,
                } => assert_eq!(kept, payload),
                other => panic!("expected plain unrecognized, got {other:?}"),
            }
        }
    }

    #[test]
    fn known_schema_with_no_variant_body_gets_a_diagnostic() {
        let payload = json!({"$schema": PAYMENTS_SCHEMA_URL, "something_else": {}});
        assert!(matches!(
            classify(&payload),
            Classification::Unrecognized {
                diagnostic: Some(_),
                ..
            }
        ));
    }
}
