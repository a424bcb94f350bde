//! Token authentication and account registration.
//!
//! The exchange happens on the send connection before anything else is
//! written to it:
//!
//! ```text
//! server: <greeting prompt>
//! client: <token>            | client: <empty line>
//! server: {"nickname": ..}   | server: <username prompt>
//!      or null               | client: <username>
//!                            | server: {"account_hash": .., "nickname": ..}
//!                            | server: <post-message prompt>
//! ```
//!
//! A rejected token is a normal answer, not an error: only network problems
//! surface as [`ChatError::Connection`].

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{debug, info};

use crate::{
    error::{ChatError, Result},
    protocol::{read_json, read_line, write_control_line},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub username: Option<String>,
}

impl Credentials {
    /// Blank strings count as absent.
    pub fn new(token: Option<String>, username: Option<String>) -> Self {
        Self {
            token: non_blank(token),
            username: non_blank(username),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.is_none() && self.username.is_none() {
            return Err(ChatError::MissingCredentials);
        }
        Ok(())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// A freshly issued account. The caller persists the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub token: String,
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized { nickname: String },
    Registered(Registration),
    NotAuthorized,
}

#[derive(Deserialize)]
struct AuthReply {
    nickname: String,
}

#[derive(Deserialize)]
struct RegistrationReply {
    account_hash: String,
    nickname: String,
}

/// Consumes the prompt the server sends as soon as the send connection opens.
pub async fn read_greeting<R>(reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let greeting = read_line(reader).await?;
    debug!(greeting = greeting.trim_end(), "server greeting");
    Ok(())
}

/// Presents `token`. Returns the nickname, or `None` when the server rejects it.
pub async fn authorise<R, W>(reader: &mut R, writer: &mut W, token: &str) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_control_line(writer, token).await?;
    let reply = read_json(reader).await?;
    if is_rejection(&reply) {
        info!("token rejected by server");
        return Ok(None);
    }

    let AuthReply { nickname } = decode(reply)?;
    info!(%nickname, "authorised");
    Ok(Some(nickname))
}

/// Registers `username`. `token_sent` tells whether the server already
/// consumed a token line this session; if not, an empty one is sent first.
pub async fn register<R, W>(
    reader: &mut R,
    writer: &mut W,
    username: &str,
    token_sent: bool,
) -> Result<Registration>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !token_sent {
        write_control_line(writer, "").await?;
    }

    let prompt = read_line(reader).await?;
    debug!(prompt = prompt.trim_end(), "username prompt");
    write_control_line(writer, username).await?;

    let RegistrationReply {
        account_hash,
        nickname,
    } = decode(read_json(reader).await?)?;

    // The server follows up with a "post your message" prompt.
    read_line(reader).await?;

    info!(%nickname, "registered new account");
    Ok(Registration {
        token: account_hash,
        nickname,
    })
}

/// Full handshake: greeting, token if any, registration as a fallback.
pub async fn authorise_or_register<R, W>(
    reader: &mut R,
    writer: &mut W,
    credentials: &Credentials,
) -> Result<AuthOutcome>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    credentials.validate()?;
    read_greeting(reader).await?;

    if let Some(token) = &credentials.token {
        if let Some(nickname) = authorise(reader, writer, token).await? {
            return Ok(AuthOutcome::Authorized { nickname });
        }
    }

    match &credentials.username {
        Some(username) => {
            let registration =
                register(reader, writer, username, credentials.token.is_some()).await?;
            Ok(AuthOutcome::Registered(registration))
        }
        None => Ok(AuthOutcome::NotAuthorized),
    }
}

fn is_rejection(reply: &Value) -> bool {
    match reply {
        Value::Null => true,
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

fn decode<T: DeserializeOwned>(reply: Value) -> Result<T> {
    let shown = reply.to_string();
    serde_json::from_value(reply)
        .map_err(|err| ChatError::MalformedResponse(format!("{err} in {shown}")))
}
