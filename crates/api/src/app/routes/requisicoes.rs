use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use uuid::Uuid;

use almox_core::AggregateId;
use almox_infra::RecycleEntry;
use almox_requisitions::{
    AddItem, AttendItem, CreateRequisition, Decide, DecisionId, DeleteRequisition, MarkInUse,
    RequisitionAction, RequisitionCommand, RequisitionId, RequisitionItemId, ReturnItem,
};

use crate::app::routes::common::{error_summary, require_idempotency_key};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_requisicao).get(list_requisicoes))
        .route("/lixeira", get(list_lixeira))
        .route("/:id", get(get_requisicao).delete(delete_requisicao))
        .route("/:id/decidir", post(decidir))
        .route("/:id/atender", post(atender))
        .route("/:id/devolver", post(devolver))
        .route("/:id/em-uso", post(marcar_em_uso))
}

async fn create_requisicao(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::CreateRequisicaoRequest>,
) -> axum::response::Response {
    // Validate every item before committing anything; a bad line must not
    // leave a half-built requisition behind.
    let mut materials = Vec::with_capacity(body.itens.len());
    for item in &body.itens {
        let agg: AggregateId = match item.material_id.parse() {
            Ok(v) => v,
            Err(_) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid material_id");
            }
        };
        if item.quantidade == 0 {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_quantity",
                "quantidade must be greater than zero",
            );
        }
        materials.push(almox_catalog::MaterialId::new(agg));
    }

    let id = RequisitionId::new(AggregateId::new());
    let create = RequisitionCommand::CreateRequisition(CreateRequisition {
        requisition_id: id,
        requested_by: actor.actor_id(),
        needed_by: body.data_necessidade,
        location: body.local_aplicacao,
        justification: body.justificativa,
        occurred_at: Utc::now(),
    });
    if let Err(e) = services.dispatch(id, create, None) {
        return errors::dispatch_error_to_response(e);
    }

    for (item, material) in body.itens.iter().zip(materials) {
        let add = RequisitionCommand::AddItem(AddItem {
            requisition_id: id,
            item_id: RequisitionItemId::new(AggregateId::new()),
            material_id: material,
            description: item.descricao.clone(),
            qty_requested: item.quantidade,
            occurred_at: Utc::now(),
        });
        if let Err(e) = services.dispatch(id, add, None) {
            return errors::dispatch_error_to_response(e);
        }
    }

    match services.get(id) {
        Some(rm) => (StatusCode::CREATED, Json(dto::requisition_to_json(rm))).into_response(),
        None => (
            StatusCode::CREATED,
            Json(serde_json::json!({"id": id.to_string()})),
        )
            .into_response(),
    }
}

async fn list_requisicoes(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let items = services
        .list_visible(actor.claims())
        .iter()
        .map(|rm| dto::requisition_listing_json(rm, &query))
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

async fn get_requisicao(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_requisition_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Out-of-scope requisitions are indistinguishable from missing ones.
    match services.get(id).filter(|rm| services.is_visible(actor.claims(), rm)) {
        Some(rm) => (StatusCode::OK, Json(dto::requisition_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "requisition not found"),
    }
}

async fn decidir(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::DecisaoRequest>,
) -> axum::response::Response {
    let id = match parse_requisition_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let kind = match dto::parse_decision_kind(&body.tipo) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let req = match services.load_requisition(id) {
        Ok(v) => v,
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    if let Err(e) = services
        .gate()
        .authorize(actor.claims(), &req, RequisitionAction::Decide(kind))
    {
        return errors::domain_error_to_response(e);
    }

    let cmd = RequisitionCommand::Decide(Decide {
        requisition_id: id,
        decision_id: DecisionId::new(AggregateId::new()),
        actor: actor.actor_id(),
        kind,
        reason: body.motivo,
        occurred_at: Utc::now(),
    });
    if let Err(e) = services.dispatch(id, cmd, None) {
        return errors::dispatch_error_to_response(e);
    }

    updated(&services, id)
}

async fn atender(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<dto::AtenderRequest>,
) -> axum::response::Response {
    let id = match parse_requisition_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let request_key = match require_idempotency_key(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let req = match services.load_requisition(id) {
        Ok(v) => v,
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    if let Err(e) = services
        .gate()
        .authorize(actor.claims(), &req, RequisitionAction::Attend)
    {
        return errors::domain_error_to_response(e);
    }

    // Items are evaluated independently; one bad item never aborts siblings.
    let mut resumo = Vec::with_capacity(body.itens.len());
    for item in &body.itens {
        let item_id = match item.rqi_id.parse::<AggregateId>() {
            Ok(v) => RequisitionItemId::new(v),
            Err(_) => {
                resumo.push(item_error(&item.rqi_id, "invalid_id", "invalid rqi_id"));
                continue;
            }
        };
        let cmd = RequisitionCommand::AttendItem(AttendItem {
            requisition_id: id,
            item_id,
            quantity: item.quantidade,
            occurred_at: Utc::now(),
        });
        match services.dispatch(id, cmd, sub_key(request_key, item_id)) {
            Ok(_) => resumo.push(item_ok(&item.rqi_id)),
            Err(e) => {
                let (codigo, mensagem) = error_summary(&e);
                resumo.push(item_error(&item.rqi_id, &codigo, &mensagem));
            }
        }
    }

    updated_with_resumo(&services, id, resumo)
}

async fn devolver(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<dto::DevolverRequest>,
) -> axum::response::Response {
    let id = match parse_requisition_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let request_key = match require_idempotency_key(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let req = match services.load_requisition(id) {
        Ok(v) => v,
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    if let Err(e) = services
        .gate()
        .authorize(actor.claims(), &req, RequisitionAction::Return)
    {
        return errors::domain_error_to_response(e);
    }

    let mut resumo = Vec::with_capacity(body.itens.len());
    for item in &body.itens {
        let item_id = match item.rqi_id.parse::<AggregateId>() {
            Ok(v) => RequisitionItemId::new(v),
            Err(_) => {
                resumo.push(item_error(&item.rqi_id, "invalid_id", "invalid rqi_id"));
                continue;
            }
        };
        let condition = match dto::parse_condition(item.condicao.as_deref()) {
            Ok(v) => v,
            Err(_) => {
                resumo.push(item_error(
                    &item.rqi_id,
                    "invalid_condition",
                    "condicao must be one of: Good, Damaged, Lost",
                ));
                continue;
            }
        };
        let cmd = RequisitionCommand::ReturnItem(ReturnItem {
            requisition_id: id,
            item_id,
            quantity: item.quantidade,
            condition,
            notes: item.obs.clone(),
            occurred_at: Utc::now(),
        });
        match services.dispatch(id, cmd, sub_key(request_key, item_id)) {
            Ok(_) => resumo.push(item_ok(&item.rqi_id)),
            Err(e) => {
                let (codigo, mensagem) = error_summary(&e);
                resumo.push(item_error(&item.rqi_id, &codigo, &mensagem));
            }
        }
    }

    updated_with_resumo(&services, id, resumo)
}

async fn marcar_em_uso(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_requisition_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let req = match services.load_requisition(id) {
        Ok(v) => v,
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    if let Err(e) = services
        .gate()
        .authorize(actor.claims(), &req, RequisitionAction::MarkInUse)
    {
        return errors::domain_error_to_response(e);
    }

    let cmd = RequisitionCommand::MarkInUse(MarkInUse {
        requisition_id: id,
        occurred_at: Utc::now(),
    });
    if let Err(e) = services.dispatch(id, cmd, None) {
        return errors::dispatch_error_to_response(e);
    }

    updated(&services, id)
}

async fn delete_requisicao(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_requisition_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let req = match services.load_requisition(id) {
        Ok(v) => v,
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    if let Err(e) = services
        .gate()
        .authorize(actor.claims(), &req, RequisitionAction::Delete)
    {
        return errors::domain_error_to_response(e);
    }

    // Snapshot before the delete so the recycle log holds the final state.
    let snapshot = services
        .get(id)
        .map(dto::requisition_to_json)
        .unwrap_or_else(|| serde_json::json!({"id": id.to_string()}));

    let cmd = RequisitionCommand::DeleteRequisition(DeleteRequisition {
        requisition_id: id,
        occurred_at: Utc::now(),
    });
    if let Err(e) = services.dispatch(id, cmd, None) {
        return errors::dispatch_error_to_response(e);
    }

    services.record_recycle(RecycleEntry {
        requisition_id: id,
        deleted_by: actor.actor_id(),
        deleted_at: Utc::now(),
        snapshot,
    });

    (
        StatusCode::OK,
        Json(serde_json::json!({"id": id.to_string(), "deleted": true})),
    )
        .into_response()
}

async fn list_lixeira(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
) -> axum::response::Response {
    if !actor.is_admin() {
        return errors::json_error(
            StatusCode::FORBIDDEN,
            "admin_only",
            "the recycle log is restricted to admins",
        );
    }

    let items = services
        .recycle_entries()
        .into_iter()
        .map(|e| {
            serde_json::json!({
                "id": e.requisition_id.to_string(),
                "apagada_por": e.deleted_by.to_string(),
                "apagada_em": e.deleted_at,
                "snapshot": e.snapshot,
            })
        })
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

fn parse_requisition_id(raw: &str) -> Result<RequisitionId, axum::response::Response> {
    raw.parse::<AggregateId>()
        .map(RequisitionId::new)
        .map_err(|_| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid requisition id")
        })
}

/// Per-item idempotency sub-key derived from the request key.
fn sub_key(request_key: Uuid, item_id: RequisitionItemId) -> Option<Uuid> {
    Some(Uuid::new_v5(&request_key, item_id.0.as_uuid().as_bytes()))
}

fn item_ok(rqi_id: &str) -> serde_json::Value {
    serde_json::json!({"rqi_id": rqi_id, "status": "ok"})
}

fn item_error(rqi_id: &str, codigo: &str, mensagem: &str) -> serde_json::Value {
    serde_json::json!({
        "rqi_id": rqi_id,
        "status": "erro",
        "codigo": codigo,
        "mensagem": mensagem,
    })
}

fn updated(services: &AppServices, id: RequisitionId) -> axum::response::Response {
    match services.get(id) {
        Some(rm) => (StatusCode::OK, Json(dto::requisition_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "requisition not found"),
    }
}

fn updated_with_resumo(
    services: &AppServices,
    id: RequisitionId,
    resumo: Vec<serde_json::Value>,
) -> axum::response::Response {
    match services.get(id) {
        Some(rm) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "requisicao": dto::requisition_to_json(rm),
                "resumo": resumo,
            })),
        )
            .into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "requisition not found"),
    }
}
