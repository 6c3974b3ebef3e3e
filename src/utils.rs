use crate::config::{IceServerKind, ServerConfig};
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Prefixes an ICE server url with `stun:` / `turn:` when the caller left the scheme out.
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    const SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];
    if SCHEMES.iter().any(|scheme| config.url.starts_with(scheme)) {
        config.url.clone()
    } else {
        let scheme = match config.kind {
            IceServerKind::Turn => "turn:",
            IceServerKind::Stun => "stun:",
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: IceServerKind, url: &str) -> ServerConfig {
        ServerConfig {
            id: "test".into(),
            kind,
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn random_ids_are_sixteen_hex_digits() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_id());
    }

    #[test]
    fn scheme_is_added_from_server_kind() {
        assert_eq!(
            add_ice_url_scheme(&server(IceServerKind::Stun, "10.0.0.1:3478")),
            "stun:10.0.0.1:3478"
        );
        assert_eq!(
            add_ice_url_scheme(&server(IceServerKind::Turn, "relay.lan:3478")),
            "turn:relay.lan:3478"
        );
    }

    #[test]
    fn existing_scheme_is_kept() {
        assert_eq!(
            add_ice_url_scheme(&server(IceServerKind::Turn, "stun:10.0.0.1:3478")),
            "stun:10.0.0.1:3478"
        );
        assert_eq!(
            add_ice_url_scheme(&server(IceServerKind::Stun, "turns:relay.lan:5349")),
            "turns:relay.lan:5349"
        );
    }
}
