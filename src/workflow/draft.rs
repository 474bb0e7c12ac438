//! Typed drafts: the accumulated, not-yet-submitted field values of the
//! entity a workflow is creating.
//!
//! Field updates arrive as loosely typed JSON (`field name → value`) from the
//! parsing service and from inline edits.  [`Draft::set_field`] folds one such
//! pair into the typed record; values the record cannot represent are
//! rejected field-by-field with a [`DraftFieldError`] instead of poisoning the
//! whole draft.  Fields the client does not model are kept in `extra` so they
//! survive round trips untouched.

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::step::WorkflowKind;

// ---------------------------------------------------------------------------
// DraftFieldError
// ---------------------------------------------------------------------------

/// A single field could not be merged into the typed draft.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot set draft field `{field}`: {reason}")]
pub struct DraftFieldError {
    pub field: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// VatRate / LineItem
// ---------------------------------------------------------------------------

/// User-facing VAT band.  The rate itself is applied by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VatRate {
    #[default]
    Standard,
    Reduced,
    ZeroRated,
    Exempt,
}

/// One billable row of an invoice draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    #[serde(deserialize_with = "amount")]
    pub quantity: f64,
    #[serde(deserialize_with = "amount")]
    pub unit_price: f64,
    #[serde(default)]
    pub vat_rate: VatRate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_code: Option<String>,
}

impl LineItem {
    pub fn new(description: impl Into<String>, quantity: f64, unit_price: f64) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
            vat_rate: VatRate::default(),
            account_code: None,
        }
    }

    /// `quantity × unit_price`, rounded to pence.  VAT is not included.
    pub fn line_total(&self) -> f64 {
        round2(self.quantity * self.unit_price)
    }
}

/// Flat field names the parser uses for the item on the `line_item` step.
const LINE_ITEM_FIELDS: [&str; 5] = [
    "description",
    "quantity",
    "unit_price",
    "vat_rate",
    "account_code",
];
const REQUIRED_LINE_ITEM_FIELDS: [&str; 3] = ["description", "quantity", "unit_price"];

/// Decimal amounts arrive either as JSON numbers or as strings (`"50.00"`).
fn amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(n) => Ok(n),
        Amount::Text(s) => {
            let cleaned = s.trim().trim_start_matches('£').replace(',', "");
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| <D::Error as de::Error>::custom(format!("not an amount: {s:?}")))
        }
    }
}

// ---------------------------------------------------------------------------
// ContactDraft
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContactDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_organization: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// InvoiceDraft
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InvoiceDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    /// ISO-8601 date as produced by the parser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    /// Confirmed line items, in entry order.
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// Item parsed from the latest utterance, awaiting confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_line_item: Option<LineItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Invoice money totals.  `vat_total` is server-supplied.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: f64,
    pub vat_total: f64,
    pub grand_total: f64,
}

impl InvoiceDraft {
    /// Confirmed items followed by the pending one, if any.
    pub fn all_line_items(&self) -> impl Iterator<Item = &LineItem> {
        self.line_items.iter().chain(self.current_line_item.iter())
    }

    pub fn subtotal(&self) -> f64 {
        round2(
            self.all_line_items()
                .map(LineItem::line_total)
                .fold(0.0, |acc, total| acc + total),
        )
    }

    /// Sum the line totals and add the supplied VAT amount.
    ///
    /// ```
    /// use voice_workflow::workflow::{InvoiceDraft, LineItem};
    ///
    /// let draft = InvoiceDraft {
    ///     line_items: vec![LineItem::new("Widget", 2.0, 50.0), LineItem::new("Fee", 1.0, 10.0)],
    ///     ..Default::default()
    /// };
    /// let totals = draft.totals(12.0);
    /// assert_eq!(totals.subtotal, 110.0);
    /// assert_eq!(totals.grand_total, 122.0);
    /// ```
    pub fn totals(&self, vat_total: f64) -> InvoiceTotals {
        let subtotal = self.subtotal();
        let vat_total = round2(vat_total);
        InvoiceTotals {
            subtotal,
            vat_total,
            grand_total: round2(subtotal + vat_total),
        }
    }

    /// Take the flat line-item fields of a `line_item` step result out of
    /// `parsed` and fold them into `current_line_item`.
    ///
    /// Fields overlay the pending item, so a later utterance can correct just
    /// the price.  Until description, quantity and unit price are all known
    /// the partial fields are parked in `extra`.  On error the draft is left
    /// unchanged; the fields are removed from `parsed` either way.
    pub fn stage_line_item(
        &mut self,
        parsed: &mut Map<String, Value>,
    ) -> Result<(), DraftFieldError> {
        let item_fields: Map<String, Value> = LINE_ITEM_FIELDS
            .iter()
            .filter_map(|name| parsed.remove(*name).map(|v| (name.to_string(), v)))
            .collect();
        if item_fields.is_empty() {
            return Ok(());
        }

        let err = |reason: String| DraftFieldError {
            field: "current_line_item".to_string(),
            reason,
        };

        let mut staged = match &self.current_line_item {
            Some(item) => match serde_json::to_value(item) {
                Ok(Value::Object(map)) => map,
                Ok(other) => return Err(err(format!("line item is not an object: {other}"))),
                Err(e) => return Err(err(e.to_string())),
            },
            None => Map::new(),
        };
        for name in LINE_ITEM_FIELDS {
            if let Some(parked) = self.extra.get(name) {
                staged.entry(name).or_insert_with(|| parked.clone());
            }
        }
        staged.extend(item_fields.into_iter().filter(|(_, v)| !v.is_null()));

        let complete = REQUIRED_LINE_ITEM_FIELDS
            .iter()
            .all(|name| staged.contains_key(*name));
        if complete {
            let item: LineItem =
                serde_json::from_value(Value::Object(staged)).map_err(|e| err(e.to_string()))?;
            self.clear_parked_line_item();
            self.current_line_item = Some(item);
        } else {
            self.extra.extend(staged);
        }
        Ok(())
    }

    /// Adopt the server's confirmed item list and drop the pending item.
    pub fn commit_line_items(&mut self, items: Vec<LineItem>) {
        self.line_items = items;
        self.current_line_item = None;
        self.clear_parked_line_item();
    }

    fn clear_parked_line_item(&mut self) {
        self.extra
            .retain(|name, _| !LINE_ITEM_FIELDS.contains(&name.as_str()));
    }
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// The draft of whichever entity the session is creating.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Draft {
    Contact(ContactDraft),
    Invoice(InvoiceDraft),
}

impl Draft {
    /// An empty draft for `kind`.
    pub fn empty(kind: WorkflowKind) -> Self {
        match kind {
            WorkflowKind::Contact => Draft::Contact(ContactDraft::default()),
            WorkflowKind::Invoice => Draft::Invoice(InvoiceDraft::default()),
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        match self {
            Draft::Contact(_) => WorkflowKind::Contact,
            Draft::Invoice(_) => WorkflowKind::Invoice,
        }
    }

    pub fn as_contact(&self) -> Option<&ContactDraft> {
        match self {
            Draft::Contact(c) => Some(c),
            Draft::Invoice(_) => None,
        }
    }

    pub fn as_invoice(&self) -> Option<&InvoiceDraft> {
        match self {
            Draft::Invoice(i) => Some(i),
            Draft::Contact(_) => None,
        }
    }

    pub fn as_invoice_mut(&mut self) -> Option<&mut InvoiceDraft> {
        match self {
            Draft::Invoice(i) => Some(i),
            Draft::Contact(_) => None,
        }
    }

    /// Current JSON value of `field`, or `None` when unset.
    pub fn get(&self, field: &str) -> Option<Value> {
        let value = match self {
            Draft::Contact(c) => serde_json::to_value(c),
            Draft::Invoice(i) => serde_json::to_value(i),
        };
        match value {
            Ok(Value::Object(mut map)) => map.remove(field).filter(|v| !v.is_null()),
            _ => None,
        }
    }

    /// Overwrite one field.  On error the draft is left unchanged.
    pub fn set_field(&mut self, field: &str, value: &Value) -> Result<(), DraftFieldError> {
        match self {
            Draft::Contact(c) => set_typed_field(c, field, value),
            Draft::Invoice(i) => set_typed_field(i, field, value),
        }
    }
}

fn set_typed_field<T>(target: &mut T, field: &str, value: &Value) -> Result<(), DraftFieldError>
where
    T: Serialize + DeserializeOwned,
{
    let err = |reason: String| DraftFieldError {
        field: field.to_string(),
        reason,
    };

    let mut map = match serde_json::to_value(&*target) {
        Ok(Value::Object(map)) => map,
        Ok(other) => return Err(err(format!("draft is not an object: {other}"))),
        Err(e) => return Err(err(e.to_string())),
    };
    map.insert(field.to_string(), value.clone());

    *target = serde_json::from_value(Value::Object(map)).map_err(|e| err(e.to_string()))?;
    Ok(())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_known_field_is_typed() {
        let mut draft = Draft::empty(WorkflowKind::Contact);
        draft.set_field("name", &json!("John Smith")).unwrap();
        assert_eq!(
            draft.as_contact().unwrap().name.as_deref(),
            Some("John Smith")
        );
    }

    #[test]
    fn unknown_field_lands_in_extra() {
        let mut draft = Draft::empty(WorkflowKind::Contact);
        draft.set_field("phone", &json!("+44 20 7946 0000")).unwrap();
        let contact = draft.as_contact().unwrap();
        assert_eq!(contact.extra.get("phone"), Some(&json!("+44 20 7946 0000")));
        assert_eq!(draft.get("phone"), Some(json!("+44 20 7946 0000")));
    }

    #[test]
    fn ill_typed_value_is_rejected_without_touching_draft() {
        let mut draft = Draft::empty(WorkflowKind::Contact);
        draft.set_field("name", &json!("Jane")).unwrap();
        let before = draft.clone();

        let err = draft.set_field("is_organization", &json!("maybe")).unwrap_err();
        assert_eq!(err.field, "is_organization");
        assert_eq!(draft, before);
    }

    #[test]
    fn null_clears_an_optional_field() {
        let mut draft = Draft::empty(WorkflowKind::Invoice);
        draft.set_field("due_date", &json!("2026-11-30")).unwrap();
        draft.set_field("due_date", &Value::Null).unwrap();
        assert!(draft.as_invoice().unwrap().due_date.is_none());
        assert_eq!(draft.get("due_date"), None);
    }

    #[test]
    fn current_line_item_parses_from_object() {
        let mut draft = Draft::empty(WorkflowKind::Invoice);
        draft
            .set_field(
                "current_line_item",
                &json!({
                    "description": "Consulting",
                    "quantity": 3.0,
                    "unit_price": 120.0,
                    "vat_rate": "reduced",
                    "account_code": "200"
                }),
            )
            .unwrap();

        let item = draft.as_invoice().unwrap().current_line_item.clone().unwrap();
        assert_eq!(item.vat_rate, VatRate::Reduced);
        assert_eq!(item.line_total(), 360.0);
    }

    #[test]
    fn invoice_totals_sum_lines_and_add_supplied_vat() {
        let invoice = InvoiceDraft {
            line_items: vec![LineItem::new("Widget", 2.0, 50.00), LineItem::new("Fee", 1.0, 10.00)],
            ..Default::default()
        };
        let totals = invoice.totals(12.00);
        assert_eq!(totals.subtotal, 110.00);
        assert_eq!(totals.vat_total, 12.00);
        assert_eq!(totals.grand_total, 122.00);
    }

    #[test]
    fn pending_line_item_counts_towards_subtotal() {
        let invoice = InvoiceDraft {
            line_items: vec![LineItem::new("Widget", 1.0, 9.99)],
            current_line_item: Some(LineItem::new("Bolt", 4.0, 0.25)),
            ..Default::default()
        };
        assert_eq!(invoice.all_line_items().count(), 2);
        assert_eq!(invoice.subtotal(), 10.99);
    }

    #[test]
    fn line_total_rounds_to_pence() {
        assert_eq!(LineItem::new("Thing", 3.0, 0.333).line_total(), 1.0);
    }

    #[test]
    fn empty_invoice_subtotal_is_positive_zero() {
        let subtotal = InvoiceDraft::default().subtotal();
        assert_eq!(subtotal, 0.0);
        assert!(subtotal.is_sign_positive());
        assert_eq!(format!("{subtotal:.2}"), "0.00");
    }

    fn parsed(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn flat_line_item_fields_become_the_pending_item() {
        let mut invoice = InvoiceDraft::default();
        let mut rest = parsed(json!({
            "description": "Widget",
            "quantity": "2",
            "unit_price": "50.00",
            "account_code": "200",
            "vat_rate": "standard",
            "due_date": "2026-11-30"
        }));
        invoice.stage_line_item(&mut rest).unwrap();

        let item = invoice.current_line_item.clone().unwrap();
        assert_eq!(item.description, "Widget");
        assert_eq!(item.quantity, 2.0);
        assert_eq!(item.unit_price, 50.0);
        assert_eq!(item.account_code.as_deref(), Some("200"));
        assert!(invoice.extra.is_empty());
        assert_eq!(rest.keys().collect::<Vec<_>>(), vec!["due_date"]);
        assert_eq!(invoice.subtotal(), 100.0);
    }

    #[test]
    fn partial_line_item_waits_for_the_rest() {
        let mut invoice = InvoiceDraft::default();
        invoice
            .stage_line_item(&mut parsed(json!({ "description": "Bolt", "quantity": 4 })))
            .unwrap();
        assert!(invoice.current_line_item.is_none());
        assert_eq!(invoice.extra.get("description"), Some(&json!("Bolt")));

        invoice
            .stage_line_item(&mut parsed(json!({ "unit_price": "0.25" })))
            .unwrap();
        assert_eq!(invoice.current_line_item, Some(LineItem::new("Bolt", 4.0, 0.25)));
        assert!(invoice.extra.is_empty());
    }

    #[test]
    fn later_utterance_corrects_the_pending_item() {
        let mut invoice = InvoiceDraft {
            current_line_item: Some(LineItem::new("Widget", 2.0, 50.0)),
            ..Default::default()
        };
        invoice
            .stage_line_item(&mut parsed(json!({ "unit_price": "45" })))
            .unwrap();
        assert_eq!(invoice.current_line_item, Some(LineItem::new("Widget", 2.0, 45.0)));
    }

    #[test]
    fn bad_amount_leaves_pending_item_alone() {
        let mut invoice = InvoiceDraft {
            current_line_item: Some(LineItem::new("Widget", 2.0, 50.0)),
            ..Default::default()
        };
        let before = invoice.clone();
        let mut fields = parsed(json!({ "quantity": "a few", "due_date": "2026-11-30" }));
        let err = invoice.stage_line_item(&mut fields).unwrap_err();
        assert_eq!(err.field, "current_line_item");
        assert_eq!(invoice, before);
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn commit_replaces_list_and_drops_pending() {
        let mut invoice = InvoiceDraft {
            current_line_item: Some(LineItem::new("Widget", 2.0, 50.0)),
            ..Default::default()
        };
        invoice.extra.insert("quantity".into(), json!(3));
        invoice.commit_line_items(vec![LineItem::new("Widget", 2.0, 50.0)]);
        assert_eq!(invoice.line_items.len(), 1);
        assert!(invoice.current_line_item.is_none());
        assert!(invoice.extra.is_empty());
    }

    #[test]
    fn draft_kind_matches_variant() {
        assert_eq!(Draft::empty(WorkflowKind::Invoice).kind(), WorkflowKind::Invoice);
        assert!(Draft::empty(WorkflowKind::Contact).as_invoice().is_none());
    }
}
