use crate::store::StoreError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Operation is valid in general but not in the record's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    MatchFull,
    NotEnoughPlayers,
    NotStarted,
    MatchClosed,
    ChallengeNotPending,
    DuplicateChallenge,
}

impl ConflictKind {
    pub fn message(&self) -> &'static str {
        match self {
            ConflictKind::MatchFull => "Session already has 2 players.",
            ConflictKind::NotEnoughPlayers => "Waiting for second player.",
            ConflictKind::NotStarted => "Session has not started yet.",
            ConflictKind::MatchClosed => "Match is already closed.",
            ConflictKind::ChallengeNotPending => "Challenge is no longer pending.",
            ConflictKind::DuplicateChallenge => {
                "There is already a pending challenge between both users."
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PvpError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0} not found.")]
    NotFound(&'static str),

    #[error("Forbidden")]
    Forbidden,

    #[error("{}", .0.message())]
    Conflict(ConflictKind),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Question generation failed: {0}")]
    Upstream(String),

    #[error("Too many requests. Please slow down.")]
    RateLimited,

    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("Server misconfigured: {0}")]
    Misconfigured(String),
}

impl PvpError {
    pub fn code(&self) -> &'static str {
        match self {
            PvpError::Unauthorized => "unauthorized",
            PvpError::NotFound(_) => "not_found",
            PvpError::Forbidden => "forbidden",
            PvpError::Conflict(ConflictKind::MatchFull) => "match_full",
            PvpError::Conflict(ConflictKind::NotEnoughPlayers) => "not_enough_players",
            PvpError::Conflict(ConflictKind::NotStarted) => "not_started",
            PvpError::Conflict(ConflictKind::MatchClosed) => "match_closed",
            PvpError::Conflict(ConflictKind::ChallengeNotPending) => "challenge_not_pending",
            PvpError::Conflict(ConflictKind::DuplicateChallenge) => "duplicate_challenge",
            PvpError::Validation(_) => "validation",
            PvpError::Upstream(_) => "upstream_generation",
            PvpError::RateLimited => "rate_limited",
            PvpError::Store(_) => "store",
            PvpError::Misconfigured(_) => "misconfigured",
        }
    }
}

impl ResponseError for PvpError {
    fn status_code(&self) -> StatusCode {
        match self {
            PvpError::Unauthorized => StatusCode::UNAUTHORIZED,
            PvpError::NotFound(_) => StatusCode::NOT_FOUND,
            PvpError::Forbidden => StatusCode::FORBIDDEN,
            PvpError::Conflict(_) => StatusCode::CONFLICT,
            PvpError::Validation(_) => StatusCode::BAD_REQUEST,
            PvpError::Upstream(_) => StatusCode::BAD_GATEWAY,
            PvpError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            PvpError::Store(_) | PvpError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }))
    }
}
