use crate::api::caller::Caller;
use crate::api::rate_limit::RateLimiter;
use crate::api::requests::CreateChallengeRequest;
use crate::error::PvpError;
use crate::ids::ChallengeId;
use crate::matches::PvpService;
use actix_web::{get, post, web, HttpResponse, Responder};
use serde_json::json;

fn parse_challenge_id(raw: &str) -> Result<ChallengeId, PvpError> {
    ChallengeId::parse(raw).ok_or(PvpError::NotFound("Challenge"))
}

#[post("/challenges")]
pub async fn create_challenge(
    service: web::Data<PvpService>,
    limiter: web::Data<RateLimiter>,
    caller: Caller,
    body: web::Json<CreateChallengeRequest>,
) -> Result<impl Responder, PvpError> {
    limiter.check(caller.uid(), "pvp_challenge_post")?;
    let request = body.into_inner();
    let challenge = service.create_challenge(caller.identity(), &request.challenged_uid, request.mode)?;

    Ok(HttpResponse::Created().json(json!({ "challenge": challenge })))
}

#[get("/challenges/inbox")]
pub async fn challenge_inbox(
    service: web::Data<PvpService>,
    limiter: web::Data<RateLimiter>,
    caller: Caller,
) -> Result<impl Responder, PvpError> {
    limiter.check(caller.uid(), "pvp_challenge_inbox")?;

    Ok(web::Json(service.challenge_inbox(caller.uid())?))
}

#[post("/challenges/{challenge_id}/accept")]
pub async fn accept_challenge(
    service: web::Data<PvpService>,
    limiter: web::Data<RateLimiter>,
    caller: Caller,
    challenge_id: web::Path<String>,
) -> Result<impl Responder, PvpError> {
    limiter.check(caller.uid(), "pvp_challenge_accept")?;
    let id = parse_challenge_id(&challenge_id)?;

    Ok(web::Json(service.accept_challenge(&id, caller.identity()).await?))
}

#[post("/challenges/{challenge_id}/decline")]
pub async fn decline_challenge(
    service: web::Data<PvpService>,
    limiter: web::Data<RateLimiter>,
    caller: Caller,
    challenge_id: web::Path<String>,
) -> Result<impl Responder, PvpError> {
    limiter.check(caller.uid(), "pvp_challenge_decline")?;
    let id = parse_challenge_id(&challenge_id)?;
    service.decline_challenge(&id, caller.uid())?;

    Ok(web::Json(json!({ "success": true })))
}
