use crate::error::PvpError;
use crate::ids::UserId;
use crate::store::directory::Identity;
use actix_web::dev::Payload;
use actix_web::http::header::HeaderMap;
use actix_web::{FromRequest, HttpRequest};
use std::future::{ready, Ready};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// The authenticated user, as asserted by the gateway in front of this service.
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

impl Caller {
    pub fn uid(&self) -> &UserId {
        &self.0.uid
    }

    pub fn identity(&self) -> &Identity {
        &self.0
    }

    fn from_headers(headers: &HeaderMap) -> Result<Caller, PvpError> {
        let uid = header(headers, USER_ID_HEADER).ok_or(PvpError::Unauthorized)?;

        Ok(Caller(Identity::new(
            UserId(uid),
            header(headers, USER_NAME_HEADER),
            header(headers, USER_EMAIL_HEADER),
        )))
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|x| x.to_str().ok())
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(String::from)
}

impl FromRequest for Caller {
    type Error = PvpError;
    type Future = Ready<Result<Caller, PvpError>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Caller::from_headers(req.headers()))
    }
}
