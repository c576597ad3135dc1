use actix_web::web;

use crate::error::ApiError;

mod groups;
mod messages;
mod users;


/// Registers every route plus extractor configs that turn binding failures
/// into parameter errors.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| ApiError::parameter(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| ApiError::parameter(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _| ApiError::parameter(err.to_string()).into()),
    );

    messages::configure(cfg);
    groups::configure(cfg);
    users::configure(cfg);
}
