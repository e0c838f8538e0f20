use crate::api::caller::Caller;
use crate::api::requests::HistoryQuery;
use crate::error::PvpError;
use crate::matches::PvpService;
use actix_web::{get, web, Responder};

#[get("/history")]
pub async fn get_history(
    service: web::Data<PvpService>,
    caller: Caller,
    query: web::Query<HistoryQuery>,
) -> Result<impl Responder, PvpError> {
    let query = query.into_inner();
    let page = service.history(caller.uid(), query.limit, query.cursor.as_deref())?;

    Ok(web::Json(page))
}
