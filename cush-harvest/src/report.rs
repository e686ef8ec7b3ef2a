//! COUNTER wire-format helpers shared by the client and the normalizers
//!
//! Release 5 and release 5.1 disagree about where attributes live and how
//! identifiers are spelled; the helpers here absorb the differences that
//! are not specific to one report family.

use cush_common::db::models::{Release, ReportKind};
use serde_json::Value;

/// `attributes_to_show` contents per report family and release
///
/// Release 5 asks the server for the extra item attributes explicitly;
/// release 5.1 nests most of them inside `Attribute_Performance` blocks,
/// so only the remainder is requested.
pub fn attributes_to_show(report: ReportKind, release: Release) -> Option<&'static str> {
    match (report, release) {
        (ReportKind::Tr, Release::R5) => {
            Some("Data_Type|Section_Type|Access_Type|Access_Method|YOP")
        }
        (ReportKind::Dr, Release::R5) => Some("Data_Type|Access_Method"),
        (ReportKind::Pr, Release::R5) => Some("Data_Type|Access_Method"),
        (ReportKind::Ir, Release::R5) => {
            Some("Data_Type|Access_Type|Access_Method|YOP|Authors|Publication_Date|Article_Version")
        }
        (ReportKind::Tr, Release::R5_1) => Some("Access_Type|YOP"),
        (ReportKind::Dr, Release::R5_1) => None,
        (ReportKind::Pr, Release::R5_1) => None,
        (ReportKind::Ir, Release::R5_1) => {
            Some("Access_Type|YOP|Authors|Publication_Date|Article_Version")
        }
    }
}

/// Identifiers attached to a title or item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemIdentifiers {
    pub issn: Option<String>,
    pub eissn: Option<String>,
    pub isbn: Option<String>,
    pub doi: Option<String>,
    pub proprietary: Option<String>,
    pub uri: Option<String>,
}

impl ItemIdentifiers {
    pub fn is_empty(&self) -> bool {
        self.issn.is_none()
            && self.eissn.is_none()
            && self.isbn.is_none()
            && self.doi.is_none()
            && self.proprietary.is_none()
            && self.uri.is_none()
    }
}

/// Extract identifiers from an `Item_ID` value of either generation
///
/// Release 5 spells it as an array of `{Type, Value}` pairs, release 5.1
/// as a flat object. Missing or unrecognized entries are ignored.
pub fn identifiers(item_id: Option<&Value>) -> ItemIdentifiers {
    let mut ids = ItemIdentifiers::default();
    let Some(item_id) = item_id else {
        return ids;
    };

    match item_id {
        Value::Array(pairs) => {
            for pair in pairs {
                let id_type = pair.get("Type").and_then(Value::as_str).unwrap_or("");
                let value = pair.get("Value").and_then(Value::as_str).unwrap_or("");
                assign_identifier(&mut ids, id_type, value);
            }
        }
        Value::Object(map) => {
            for (id_type, value) in map {
                if let Some(value) = value.as_str() {
                    assign_identifier(&mut ids, id_type, value);
                }
            }
        }
        _ => {}
    }

    ids
}

fn assign_identifier(ids: &mut ItemIdentifiers, id_type: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let value = Some(value.to_string());
    match id_type {
        "ISSN" | "Print_ISSN" => ids.issn = value,
        "Online_ISSN" => ids.eissn = value,
        "ISBN" => ids.isbn = value,
        "DOI" => ids.doi = value,
        "Proprietary" | "Proprietary_ID" => ids.proprietary = value,
        "URI" => ids.uri = value,
        _ => {}
    }
}

/// Fetch a string field, tolerating numeric scalars (YOP is a number in
/// some vendor payloads)
pub fn scalar_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
