//! Request/response DTOs and JSON mapping helpers.
//!
//! The wire contract keeps the Portuguese field names the admin frontend
//! already speaks (`itens`, `quantidade`, `motivo`, ...); everything is mapped
//! to typed domain values at this boundary.

use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use almox_infra::RequisitionReadModel;
use almox_requisitions::{DecisionKind, ReturnCondition};

use crate::app::errors;

#[derive(Debug, Deserialize)]
pub struct CreateRequisicaoRequest {
    pub data_necessidade: NaiveDate,
    pub local_aplicacao: String,
    pub justificativa: Option<String>,
    #[serde(default)]
    pub itens: Vec<NovoItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct NovoItemRequest {
    pub material_id: String,
    pub descricao: String,
    pub quantidade: u32,
}

/// Query flags for the list endpoint. Both default to off so the listing
/// stays a light header snapshot.
///
/// Clients send the flags as bare query parameters (`?includeItems=`), so
/// presence counts as on; only an explicit `false`/`0` turns a present flag
/// back off.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default, rename = "includeItems", deserialize_with = "flag")]
    pub include_items: bool,
    #[serde(default, rename = "includeDecisions", deserialize_with = "flag")]
    pub include_decisions: bool,
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw.as_deref() {
        None => true,
        Some(v) => !matches!(v.trim().to_lowercase().as_str(), "false" | "0"),
    })
}

#[derive(Debug, Deserialize)]
pub struct DecisaoRequest {
    pub tipo: String,
    pub motivo: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AtenderRequest {
    pub itens: Vec<AtenderItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AtenderItemRequest {
    pub rqi_id: String,
    pub quantidade: u32,
}

#[derive(Debug, Deserialize)]
pub struct DevolverRequest {
    pub itens: Vec<DevolverItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct DevolverItemRequest {
    pub rqi_id: String,
    pub quantidade: u32,
    pub condicao: Option<String>,
    pub obs: Option<String>,
}

pub fn parse_decision_kind(s: &str) -> Result<DecisionKind, axum::response::Response> {
    match s.to_lowercase().as_str() {
        "aprovar" => Ok(DecisionKind::Approve),
        "rejeitar" => Ok(DecisionKind::Reject),
        "cancelar" => Ok(DecisionKind::Cancel),
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_decision",
            "tipo must be one of: Aprovar, Rejeitar, Cancelar",
        )),
    }
}

pub fn parse_condition(s: Option<&str>) -> Result<ReturnCondition, axum::response::Response> {
    match s {
        None => Ok(ReturnCondition::Good),
        Some(raw) => match raw.to_lowercase().as_str() {
            "good" => Ok(ReturnCondition::Good),
            "damaged" => Ok(ReturnCondition::Damaged),
            "lost" => Ok(ReturnCondition::Lost),
            _ => Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_condition",
                "condicao must be one of: Good, Damaged, Lost",
            )),
        },
    }
}

pub fn decision_kind_to_str(kind: DecisionKind) -> &'static str {
    match kind {
        DecisionKind::Approve => "aprovar",
        DecisionKind::Reject => "rejeitar",
        DecisionKind::Cancel => "cancelar",
    }
}

pub fn requisition_to_json(rm: RequisitionReadModel) -> JsonValue {
    let mut body = header_json(&rm);
    if let Some(obj) = body.as_object_mut() {
        obj.insert("itens".to_string(), items_json(&rm));
        obj.insert("decisoes".to_string(), decisions_json(&rm));
    }
    body
}

/// Listing entry; items/decisions only when the caller asked for them.
pub fn requisition_listing_json(rm: &RequisitionReadModel, query: &ListQuery) -> JsonValue {
    let mut body = header_json(rm);
    if let Some(obj) = body.as_object_mut() {
        if query.include_items {
            obj.insert("itens".to_string(), items_json(rm));
        }
        if query.include_decisions {
            obj.insert("decisoes".to_string(), decisions_json(rm));
        }
    }
    body
}

fn header_json(rm: &RequisitionReadModel) -> JsonValue {
    json!({
        "id": rm.requisition_id.to_string(),
        "solicitante": rm.requested_by.to_string(),
        "data_necessidade": rm.needed_by,
        "local_aplicacao": rm.location,
        "justificativa": rm.justification,
        "criada_em": rm.created_at,
        "status": rm.status,
    })
}

fn items_json(rm: &RequisitionReadModel) -> JsonValue {
    JsonValue::Array(rm.items.iter().map(|i| json!({
        "rqi_id": i.item_id.to_string(),
        "material_id": i.material_id.to_string(),
        "descricao": i.description,
        "quantidade_solicitada": i.qty_requested,
        "quantidade_atendida": i.qty_attended,
        "quantidade_devolvida": i.qty_returned,
        "em_uso": i.qty_attended - i.qty_returned,
        "status": i.status,
    })).collect())
}

fn decisions_json(rm: &RequisitionReadModel) -> JsonValue {
    JsonValue::Array(rm.decisions.iter().map(|d| json!({
        "id": d.decision_id.to_string(),
        "decidido_por": d.decided_by.to_string(),
        "tipo": decision_kind_to_str(d.kind),
        "motivo": d.reason,
        "decidido_em": d.decided_at,
    })).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use almox_core::{AggregateId, UserId};
    use almox_requisitions::{RequisitionId, RequisitionStatus};
    use chrono::Utc;

    fn read_model() -> RequisitionReadModel {
        RequisitionReadModel {
            requisition_id: RequisitionId::new(AggregateId::new()),
            requested_by: UserId::new(),
            needed_by: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            location: "central warehouse".to_string(),
            justification: None,
            created_at: Utc::now(),
            status: RequisitionStatus::Pending,
            items: vec![],
            decisions: vec![],
            deleted: false,
        }
    }

    #[test]
    fn decision_kind_parses_case_insensitively() {
        assert_eq!(parse_decision_kind("Aprovar").unwrap(), DecisionKind::Approve);
        assert_eq!(parse_decision_kind("rejeitar").unwrap(), DecisionKind::Reject);
        assert_eq!(parse_decision_kind("CANCELAR").unwrap(), DecisionKind::Cancel);
        assert!(parse_decision_kind("aprovado").is_err());
    }

    #[test]
    fn absent_condition_defaults_to_good() {
        assert_eq!(parse_condition(None).unwrap(), ReturnCondition::Good);
        assert_eq!(parse_condition(Some("Damaged")).unwrap(), ReturnCondition::Damaged);
        assert!(parse_condition(Some("broken")).is_err());
    }

    #[test]
    fn flag_presence_counts_as_on() {
        let q: ListQuery =
            serde_json::from_value(json!({"includeItems": "", "includeDecisions": "false"}))
                .unwrap();
        assert!(q.include_items);
        assert!(!q.include_decisions);

        let q: ListQuery = serde_json::from_value(json!({"includeItems": "true"})).unwrap();
        assert!(q.include_items);
        assert!(!q.include_decisions);

        let q: ListQuery = serde_json::from_value(json!({})).unwrap();
        assert!(!q.include_items);
        assert!(!q.include_decisions);
    }

    #[test]
    fn listing_omits_items_and_decisions_unless_asked() {
        let rm = read_model();

        let bare = requisition_listing_json(&rm, &ListQuery::default());
        assert!(bare.get("itens").is_none());
        assert!(bare.get("decisoes").is_none());

        let full = requisition_listing_json(
            &rm,
            &ListQuery {
                include_items: true,
                include_decisions: true,
            },
        );
        assert!(full.get("itens").is_some());
        assert!(full.get("decisoes").is_some());
    }
}
