//! Identidad del usuario que lanza la petición.
//!
//! La autenticación real la hace el proveedor de identidad delante del
//! servicio; aquí sólo se lee la identidad ya resuelta de las cabeceras.

use axum::http::HeaderMap;
use serde::Serialize;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    pub uid: String,
    pub email: Option<String>,
}

pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserIdentity>;
}

/// Identidad resuelta a partir de las cabeceras de la petición.
#[derive(Debug, Clone, Default)]
pub struct HeaderIdentity {
    user: Option<UserIdentity>,
}

impl HeaderIdentity {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let user = header(USER_ID_HEADER).map(|uid| UserIdentity {
            uid,
            email: header(USER_EMAIL_HEADER),
        });
        Self { user }
    }
}

impl IdentityProvider for HeaderIdentity {
    fn current_user(&self) -> Option<UserIdentity> {
        self.user.clone()
    }
}
