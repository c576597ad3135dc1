use sea_orm::{DbErr, SqlErr};

/// Coarse error classes shared by every service. The HTTP layer maps a class
/// to a status; the numeric code narrows it down for clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Parameter,
    Auth,
    Permission,
    Resource,
    Business,
    System,
}

pub mod codes {
    pub const INVALID_PARAMETER: u32 = 40000;
    pub const UNKNOWN_MESSAGE_TYPE: u32 = 40001;
    pub const SEND_TIME_REGRESSION: u32 = 40002;

    pub const MISSING_TOKEN: u32 = 40100;
    pub const INVALID_TOKEN: u32 = 40101;
    pub const EXPIRED_TOKEN: u32 = 40102;
    pub const MISSING_USER_CLAIM: u32 = 40103;

    pub const INSUFFICIENT_ROLE: u32 = 40300;

    pub const GROUP_NOT_FOUND: u32 = 40400;
    pub const MESSAGE_NOT_FOUND: u32 = 40401;
    pub const USER_NOT_FOUND: u32 = 40402;

    pub const ALREADY_EXISTS: u32 = 40900;
    pub const GROUP_NAME_TAKEN: u32 = 40901;

    pub const ALL_USERS_GROUP_MEMBERS: u32 = 42200;
    pub const MESSAGE_NOT_VISIBLE: u32 = 42201;

    pub const INTERNAL: u32 = 50000;
}

pub trait Classified {
    fn class(&self) -> ErrorClass;
    fn code(&self) -> u32;
}

impl Classified for DbErr {
    fn class(&self) -> ErrorClass {
        if is_unique_violation(self) {
            ErrorClass::Resource
        } else {
            ErrorClass::System
        }
    }

    fn code(&self) -> u32 {
        if is_unique_violation(self) {
            codes::ALREADY_EXISTS
        } else {
            codes::INTERNAL
        }
    }
}

pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Errors worth retrying on the read path: the pool or the connection failed,
/// not the statement.
pub fn is_transient(err: &DbErr) -> bool {
    matches!(err, DbErr::ConnectionAcquire(_) | DbErr::Conn(_))
}
