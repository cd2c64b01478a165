use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::info;

use crate::{
    gateway::RecordId,
    moderation::{
        AttachmentInput, ModerationDomain, ModerationRequest,
        certificates::{
            CertificateApplication, CertificateExtra, Certificates, ISSUED_CERTIFICATE_POLICY,
        },
        grievances::{Grievance, Grievances, filter_by_status},
        payments::{Payment, Payments, RECEIPT_POLICY},
    },
    web::{
        AppState,
        auth::authorize,
        responses::{ApiResult, form_error, gateway_error, json_error, moderation_error},
        uploads::{FileFieldConfig, FormData, FormResult, read_multipart},
    },
};

const CLEAR_ATTACHMENT_FIELD: &str = "clear_attachment";

/// Run one moderation action, refusing a second concurrent action on the same record.
async fn moderate<D: ModerationDomain>(
    state: &AppState,
    request: ModerationRequest<D>,
) -> ApiResult<Json<D::Record>> {
    let Some(_guard) = state.in_flight().acquire(D::NAME, &request.id) else {
        return Err(json_error(
            StatusCode::CONFLICT,
            "an action for this record is already in progress",
        ));
    };

    state.engine().apply(request).await.map(Json).map_err(|err| {
        info!(domain = D::NAME, kind = err.kind(), "moderation action refused");
        moderation_error(err)
    })
}

/// Shared multipart fields: status, remarks, an optional file and the clear flag.
fn request_from_form<D: ModerationDomain>(
    id: RecordId,
    form: &mut FormData,
    file_field: &str,
) -> FormResult<ModerationRequest<D>> {
    let status = form.text("status").unwrap_or_default();
    let attachment = match form.take_file(file_field) {
        Some(file) => AttachmentInput::Upload(file),
        None if form.flag(CLEAR_ATTACHMENT_FIELD)? == Some(true) => AttachmentInput::Clear,
        None => AttachmentInput::Keep,
    };

    Ok(ModerationRequest::new(id, status)
        .remarks(form.text("remarks"))
        .attachment(attachment))
}

pub async fn list_payments(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<Vec<Payment>>> {
    authorize(&state, &jar)?;
    state
        .engine()
        .list::<Payments>()
        .await
        .map(Json)
        .map_err(gateway_error)
}

pub async fn moderate_payment(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<Json<Payment>> {
    authorize(&state, &jar)?;
    let mut form = read_multipart(
        multipart,
        &[FileFieldConfig::new(RECEIPT_POLICY.kind, RECEIPT_POLICY.max_bytes)],
    )
    .await
    .map_err(form_error)?;

    let request =
        request_from_form::<Payments>(RecordId::new(id), &mut form, RECEIPT_POLICY.kind)
            .map_err(form_error)?;
    moderate(&state, request).await
}

pub async fn list_certificates(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<Vec<CertificateApplication>>> {
    authorize(&state, &jar)?;
    state
        .engine()
        .list::<Certificates>()
        .await
        .map(Json)
        .map_err(gateway_error)
}

pub async fn moderate_certificate(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<Json<CertificateApplication>> {
    authorize(&state, &jar)?;
    let policy = ISSUED_CERTIFICATE_POLICY;
    let mut form = read_multipart(
        multipart,
        &[FileFieldConfig::new(policy.kind, policy.max_bytes)],
    )
    .await
    .map_err(form_error)?;

    let request = certificate_request(RecordId::new(id), &mut form).map_err(form_error)?;
    moderate(&state, request).await
}

/// The certificate form always carries the verification checkbox; an unchecked box is
/// simply absent from the body, so absence means `false`.
fn certificate_request(
    id: RecordId,
    form: &mut FormData,
) -> FormResult<ModerationRequest<Certificates>> {
    let extra = CertificateExtra {
        payment_verified: Some(form.flag("payment_verified")?.unwrap_or(false)),
    };
    Ok(request_from_form::<Certificates>(id, form, ISSUED_CERTIFICATE_POLICY.kind)?.extra(extra))
}

#[derive(Debug, Default, Deserialize)]
pub struct GrievanceFilter {
    pub status: Option<String>,
}

pub async fn list_grievances(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(filter): Query<GrievanceFilter>,
) -> ApiResult<Json<Vec<Grievance>>> {
    authorize(&state, &jar)?;
    let grievances = state
        .engine()
        .list::<Grievances>()
        .await
        .map_err(gateway_error)?;
    Ok(Json(filter_by_status(grievances, filter.status.as_deref())))
}

#[derive(Debug, Deserialize)]
pub struct GrievanceStatusForm {
    pub status: String,
    #[serde(default)]
    pub remarks: Option<String>,
}

pub async fn update_grievance_status(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
    Json(form): Json<GrievanceStatusForm>,
) -> ApiResult<Json<Grievance>> {
    authorize(&state, &jar)?;
    let request = ModerationRequest::<Grievances>::new(RecordId::new(id), form.status)
        .remarks(form.remarks);
    moderate(&state, request).await
}
