use crate::api::caller::Caller;
use crate::api::parse_match_id;
use crate::api::rate_limit::RateLimiter;
use crate::api::requests::SubmitRequest;
use crate::error::PvpError;
use crate::matches::PvpService;
use actix_web::{get, post, web, Responder};
use serde_json::json;

// Registered before `/async/{match_id}` so "inbox" is never parsed as an id.
#[get("/async/inbox")]
pub async fn async_inbox(
    service: web::Data<PvpService>,
    limiter: web::Data<RateLimiter>,
    caller: Caller,
) -> Result<impl Responder, PvpError> {
    limiter.check(caller.uid(), "pvp_async_inbox")?;
    let matches = service.async_inbox(caller.uid())?;

    Ok(web::Json(json!({ "matches": matches })))
}

#[get("/async/{match_id}")]
pub async fn get_async_match(
    service: web::Data<PvpService>,
    caller: Caller,
    match_id: web::Path<String>,
) -> Result<impl Responder, PvpError> {
    let id = parse_match_id(&match_id, "Match")?;
    let found = service.get_async(&id, caller.uid())?;

    Ok(web::Json(json!({ "match": found })))
}

#[post("/async/{match_id}/start")]
pub async fn start_async_match(
    service: web::Data<PvpService>,
    caller: Caller,
    match_id: web::Path<String>,
) -> Result<impl Responder, PvpError> {
    let id = parse_match_id(&match_id, "Match")?;
    let found = service.start_async(&id, caller.uid())?;

    Ok(web::Json(json!({ "match": found })))
}

#[post("/async/{match_id}/submit")]
pub async fn submit_async_match(
    service: web::Data<PvpService>,
    caller: Caller,
    match_id: web::Path<String>,
    body: web::Json<SubmitRequest>,
) -> Result<impl Responder, PvpError> {
    let id = parse_match_id(&match_id, "Match")?;
    let found = service.submit_async(&id, caller.uid(), &body.into_inner().into())?;

    Ok(web::Json(json!({ "match": found })))
}
