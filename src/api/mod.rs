pub mod async_endpoints;
pub mod caller;
pub mod challenge_endpoints;
pub mod history_endpoints;
pub mod rate_limit;
pub mod requests;
pub mod session_endpoints;

use crate::error::PvpError;
use crate::ids::MatchId;
use actix_web::web;

pub const API_PREFIX: &str = "/api/v1/pvp";

/// A path segment that is not a uuid cannot name anything, so it is reported as missing.
pub(crate) fn parse_match_id(raw: &str, what: &'static str) -> Result<MatchId, PvpError> {
    MatchId::parse(raw).ok_or(PvpError::NotFound(what))
}

/// Registers every PvP route. Expects `web::Data<PvpService>` and `web::Data<RateLimiter>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| PvpError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| PvpError::Validation(err.to_string()).into()),
    )
    .service(
        web::scope(API_PREFIX)
            .service(session_endpoints::create_session)
            .service(session_endpoints::get_session)
            .service(session_endpoints::join_session)
            .service(session_endpoints::start_session)
            .service(session_endpoints::submit_session)
            .service(async_endpoints::async_inbox)
            .service(async_endpoints::get_async_match)
            .service(async_endpoints::start_async_match)
            .service(async_endpoints::submit_async_match)
            .service(challenge_endpoints::create_challenge)
            .service(challenge_endpoints::challenge_inbox)
            .service(challenge_endpoints::accept_challenge)
            .service(challenge_endpoints::decline_challenge)
            .service(history_endpoints::get_history),
    );
}
