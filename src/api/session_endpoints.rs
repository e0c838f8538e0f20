use crate::api::caller::Caller;
use crate::api::parse_match_id;
use crate::api::requests::SubmitRequest;
use crate::error::PvpError;
use crate::matches::{PvpService, Submission};
use actix_web::{get, post, web, Responder};
use serde_json::json;

#[post("/session")]
pub async fn create_session(
    service: web::Data<PvpService>,
    caller: Caller,
) -> Result<impl Responder, PvpError> {
    let session = service.create_or_resume(caller.identity())?;

    Ok(web::Json(json!({ "sessionId": session.id, "session": session })))
}

#[get("/session/{session_id}")]
pub async fn get_session(
    service: web::Data<PvpService>,
    caller: Caller,
    session_id: web::Path<String>,
) -> Result<impl Responder, PvpError> {
    let id = parse_match_id(&session_id, "Session")?;
    let session = service.get_sync(&id, caller.uid())?;

    Ok(web::Json(json!({ "session": session })))
}

#[post("/session/{session_id}/join")]
pub async fn join_session(
    service: web::Data<PvpService>,
    caller: Caller,
    session_id: web::Path<String>,
) -> Result<impl Responder, PvpError> {
    let id = parse_match_id(&session_id, "Session")?;
    let session = service.join_sync(&id, caller.identity())?;

    Ok(web::Json(json!({ "session": session })))
}

#[post("/session/{session_id}/start")]
pub async fn start_session(
    service: web::Data<PvpService>,
    caller: Caller,
    session_id: web::Path<String>,
) -> Result<impl Responder, PvpError> {
    let id = parse_match_id(&session_id, "Session")?;
    let session = service.start_sync(&id, caller.uid()).await?;

    Ok(web::Json(json!({ "session": session })))
}

#[post("/session/{session_id}/submit")]
pub async fn submit_session(
    service: web::Data<PvpService>,
    caller: Caller,
    session_id: web::Path<String>,
    body: web::Json<SubmitRequest>,
) -> Result<impl Responder, PvpError> {
    let id = parse_match_id(&session_id, "Session")?;
    let submission: Submission = body.into_inner().into();
    let session = service.submit_sync(&id, caller.uid(), &submission)?;

    Ok(web::Json(json!({ "session": session })))
}
