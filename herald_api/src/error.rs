use std::fmt;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use herald_core::{
    error::{codes, Classified, ErrorClass},
    service::{
        groups::GroupsServiceError, members::MembersServiceError,
        messages::MessagesServiceError, read_state::ReadStateError, users::UsersServiceError,
    },
};
use log::error;
use sea_orm::DbErr;
use serde::Serialize;

use crate::auth::AuthError;

const INTERNAL_MESSAGE: &str = "internal server error";

/// Body of every error response.
#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    code: u32,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

/// Error returned by every handler. System errors keep their detail for the
/// log only; clients see the generic text.
#[derive(Debug)]
pub struct ApiError {
    class: ErrorClass,
    code: u32,
    message: String,
    details: Option<String>,
}

impl ApiError {
    pub fn new(class: ErrorClass, code: u32, message: impl Into<String>) -> Self {
        Self {
            class,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn parameter(details: impl Into<String>) -> Self {
        Self::new(ErrorClass::Parameter, codes::INVALID_PARAMETER, "invalid parameter")
            .with_details(details)
    }

    pub fn not_found(code: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Resource, code, message)
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(ErrorClass::System, codes::INTERNAL, INTERNAL_MESSAGE).with_details(details)
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    fn classified<E>(error: E) -> Self
    where
        E: Classified + fmt::Display + fmt::Debug,
    {
        match error.class() {
            ErrorClass::System => Self::internal(format!("{error:?}")),
            class => Self::new(class, error.code(), error.to_string()),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.class {
            ErrorClass::Parameter => StatusCode::BAD_REQUEST,
            ErrorClass::Auth => StatusCode::UNAUTHORIZED,
            ErrorClass::Permission => StatusCode::FORBIDDEN,
            ErrorClass::Resource if self.code / 100 == 409 => StatusCode::CONFLICT,
            ErrorClass::Resource => StatusCode::NOT_FOUND,
            ErrorClass::Business => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorClass::System => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let details = match self.class {
            ErrorClass::System => {
                error!(
                    "request failed: {}",
                    self.details.as_deref().unwrap_or(&self.message)
                );
                None
            }
            _ => self.details.as_deref(),
        };

        HttpResponse::build(self.status_code()).json(ErrorEnvelope {
            code: self.code,
            message: &self.message,
            details,
        })
    }
}

macro_rules! classified_from {
    ($($error:ty),+ $(,)?) => {
        $(
            impl From<$error> for ApiError {
                fn from(error: $error) -> Self {
                    Self::classified(error)
                }
            }
        )+
    };
}

classified_from!(
    DbErr,
    GroupsServiceError,
    MembersServiceError,
    MessagesServiceError,
    ReadStateError,
    UsersServiceError,
);

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        let class = match error {
            AuthError::InsufficientRole { .. } => ErrorClass::Permission,
            AuthError::Signing => ErrorClass::System,
            _ => ErrorClass::Auth,
        };
        let code = match error {
            AuthError::MissingToken => codes::MISSING_TOKEN,
            AuthError::Malformed | AuthError::BadSignature => codes::INVALID_TOKEN,
            AuthError::Expired => codes::EXPIRED_TOKEN,
            AuthError::MissingUserClaim => codes::MISSING_USER_CLAIM,
            AuthError::InsufficientRole { .. } => codes::INSUFFICIENT_ROLE,
            AuthError::Signing => codes::INTERNAL,
        };
        match class {
            ErrorClass::System => Self::internal(error.to_string()),
            class => Self::new(class, code, error.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::parameter(errors.to_string())
    }
}
