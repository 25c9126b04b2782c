//! Master-server authentication.
//!
//! The master server speaks a vintage dialect: credentials go out as a
//! form-encoded POST (`login` with a trailing colon, `pass` as the hex MD5
//! of the plaintext password) and the response body is a PHP-serialized
//! map of `s:<len>:"key";<type>:<value>;` entries. Only four fields are
//! ever consumed, so the parser is a scoped key/value scanner, not a
//! general deserializer - do not grow it into one.

use crate::error::UpstreamError;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Fallback chat server address when the master omits one.
pub const DEFAULT_CHAT_ADDRESS: &str = "chat.projectkongor.com";
/// Fallback chat server port when the master omits one.
pub const DEFAULT_CHAT_PORT: u16 = 11031;

const AUTH_PATH: &str = "/server_requester.php?f=replay_auth";

/// Master-server account and endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Base URL of the master server, no trailing slash.
    pub url: String,
    pub username: String,
    pub password: String,
    /// Game version reported in the User-Agent.
    pub version: String,
    pub platform: String,
    pub arch: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            url: "https://api.kongor.online".to_string(),
            username: String::new(),
            password: String::new(),
            version: "4.10.1".to_string(),
            platform: "lac".to_string(),
            arch: "x86_64".to_string(),
        }
    }
}

impl MasterConfig {
    /// `S2 Games/Heroes of Newerth/<version>/<platform>/<arch>` - the exact
    /// shape the master expects.
    pub fn user_agent(&self) -> String {
        format!(
            "S2 Games/Heroes of Newerth/{}/{}/{}",
            self.version, self.platform, self.arch
        )
    }
}

/// An authenticated manager session with the upstream infrastructure.
///
/// Created by [`authenticate`]; torn down on explicit disconnect or fatal
/// protocol error, never implicitly expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSession {
    pub server_id: i64,
    pub session_id: String,
    pub chat_host: String,
    pub chat_port: u16,
    pub authenticated: bool,
}

/// Authenticates against the master server.
///
/// Non-2xx statuses map onto the operator-facing taxonomy; a 2xx body goes
/// through [`parse_auth_body`].
pub async fn authenticate(
    client: &reqwest::Client,
    config: &MasterConfig,
) -> Result<UpstreamSession, UpstreamError> {
    let url = format!("{}{}", config.url, AUTH_PATH);
    // Trailing colon on the login is load-bearing; the server splits on it.
    let login = format!("{}:", config.username);
    let pass = hex::encode(Md5::digest(config.password.as_bytes()));

    debug!(%url, user = %config.username, "authenticating with master server");
    let response = client
        .post(&url)
        .header(reqwest::header::USER_AGENT, config.user_agent())
        .form(&[("login", login.as_str()), ("pass", pass.as_str())])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let code = status.as_u16();
        return Err(match code {
            401 => UpstreamError::BadCredentials,
            403 => UpstreamError::NoHostingPermission,
            500..=599 => UpstreamError::MasterOutage(code),
            other => UpstreamError::UnexpectedStatus(other),
        });
    }

    let body = response.text().await?;
    let session = parse_auth_body(&body)?;
    info!(
        server_id = session.server_id,
        chat = %session.chat_host,
        chat_port = session.chat_port,
        "🔑 master server authentication succeeded"
    );
    Ok(session)
}

/// Parses a 2xx master-server auth response body.
///
/// Extracts `server_id`, `session`, `chat_address`, and `chat_port`. A body
/// with neither `server_id` nor `session` that also mentions an error is an
/// authentication rejection carrying the body as detail; any other
/// unparseable body is a generic parse failure.
pub fn parse_auth_body(body: &str) -> Result<UpstreamSession, UpstreamError> {
    let server_id = find_key(body, "server_id").and_then(parse_int_token);
    let session_id = find_key(body, "session").and_then(parse_string_token);

    match (server_id, session_id) {
        (Some(server_id), Some(session_id)) => {
            let chat_host = find_key(body, "chat_address")
                .and_then(parse_string_token)
                .unwrap_or_else(|| DEFAULT_CHAT_ADDRESS.to_string());
            let chat_port = find_key(body, "chat_port")
                .and_then(parse_int_token)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(DEFAULT_CHAT_PORT);
            Ok(UpstreamSession {
                server_id,
                session_id,
                chat_host,
                chat_port,
                authenticated: true,
            })
        }
        _ => {
            let looks_like_rejection =
                ["error", "Invalid", "failed"].iter().any(|s| body.contains(s));
            if looks_like_rejection {
                warn!("master server rejected authentication");
                Err(UpstreamError::AuthRejected {
                    detail: body.to_string(),
                })
            } else {
                Err(UpstreamError::ParseFailure(format!(
                    "no server_id/session in {} byte body",
                    body.len()
                )))
            }
        }
    }
}

/// Locates the serialized key literal `s:<len>:"<key>";` and returns the
/// text immediately after it.
fn find_key<'a>(body: &'a str, key: &str) -> Option<&'a str> {
    let literal = format!("s:{}:\"{}\";", key.len(), key);
    let at = body.find(&literal)?;
    Some(&body[at + literal.len()..])
}

/// Parses an `i:<digits>;` token.
fn parse_int_token(rest: &str) -> Option<i64> {
    let digits = rest.strip_prefix("i:")?.split(';').next()?;
    digits.trim().parse().ok()
}

/// Parses an `s:<len>:"<value>";` token. The declared length is in bytes,
/// which for this legacy ASCII protocol is also the character count.
fn parse_string_token(rest: &str) -> Option<String> {
    let rest = rest.strip_prefix("s:")?;
    let (len_digits, rest) = rest.split_once(':')?;
    let len: usize = len_digits.parse().ok()?;
    let value = rest.strip_prefix('"')?;
    value.get(..len).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_body() {
        let body = concat!(
            "s:9:\"server_id\";i:123;",
            "s:7:\"session\";s:3:\"abc\";",
            "s:12:\"chat_address\";s:9:\"host.test\";",
            "s:9:\"chat_port\";i:11031;"
        );
        let session = parse_auth_body(body).unwrap();
        assert_eq!(session.server_id, 123);
        assert_eq!(session.session_id, "abc");
        assert_eq!(session.chat_host, "host.test");
        assert_eq!(session.chat_port, 11031);
        assert!(session.authenticated);
    }

    #[test]
    fn missing_chat_fields_fall_back_to_defaults() {
        let body = "s:9:\"server_id\";i:42;s:7:\"session\";s:6:\"cookie\";";
        let session = parse_auth_body(body).unwrap();
        assert_eq!(session.server_id, 42);
        assert_eq!(session.session_id, "cookie");
        assert_eq!(session.chat_host, DEFAULT_CHAT_ADDRESS);
        assert_eq!(session.chat_port, DEFAULT_CHAT_PORT);
    }

    #[test]
    fn rejection_body_carries_detail() {
        let body = "Invalid login or password";
        match parse_auth_body(body) {
            Err(UpstreamError::AuthRejected { detail }) => assert_eq!(detail, body),
            other => panic!("expected AuthRejected, got {other:?}"),
        }
    }

    #[test]
    fn garbage_body_is_a_parse_failure() {
        assert!(matches!(
            parse_auth_body("<html>totally unexpected</html>"),
            Err(UpstreamError::ParseFailure(_))
        ));
    }

    #[test]
    fn fields_are_order_independent() {
        let body = concat!(
            "s:9:\"chat_port\";i:9999;",
            "s:7:\"session\";s:4:\"zzzz\";",
            "s:9:\"server_id\";i:7;"
        );
        let session = parse_auth_body(body).unwrap();
        assert_eq!(session.server_id, 7);
        assert_eq!(session.session_id, "zzzz");
        assert_eq!(session.chat_port, 9999);
    }

    #[test]
    fn string_token_respects_declared_length() {
        // Quote inside the value; the declared length wins over delimiters.
        let body = "s:7:\"session\";s:5:\"ab\"cd\";s:9:\"server_id\";i:1;";
        let session = parse_auth_body(body).unwrap();
        assert_eq!(session.session_id, "ab\"cd");
    }

    #[test]
    fn user_agent_shape() {
        let config = MasterConfig {
            version: "4.10.1".to_string(),
            platform: "wac".to_string(),
            arch: "x86_64".to_string(),
            ..MasterConfig::default()
        };
        assert_eq!(
            config.user_agent(),
            "S2 Games/Heroes of Newerth/4.10.1/wac/x86_64"
        );
    }

    #[test]
    fn password_digest_is_lowercase_hex_md5() {
        let digest = hex::encode(Md5::digest(b"password"));
        assert_eq!(digest, "5f4dcc3b5aa765d61d8327deb882cf99");
    }
}
