use serde::Deserialize;

use crate::error::Result;

/// Which auth method a SOCKS5 listener offers. `UserPass` still accepts
/// every credential (see DESIGN.md open question (a)); only the
/// method-negotiation step is real.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth,
    UserPass,
}

#[derive(Debug, Deserialize)]
struct RawSocksConfig {
    method: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SocksListenerConfig {
    pub auth: AuthMethod,
}

impl SocksListenerConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw: RawSocksConfig = crate::config::load_json(path)?;
        let auth = if raw.method == "password" { AuthMethod::UserPass } else { AuthMethod::NoAuth };
        Ok(Self { auth })
    }
}
