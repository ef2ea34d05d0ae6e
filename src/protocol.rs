//! Packet schema, validation, and request dispatch (§4.6).
//!
//! One JSON object per connection. `Transport` hands the raw bytes to
//! [`parse_packet`]; `handle` dispatches by `cmRequest` and returns the
//! wire-ready `(code, body)` pair.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth;
use crate::context::ServerContext;
use crate::error::{AuthError, ProtocolError, RequestError};

#[derive(Debug, Clone, Deserialize)]
pub struct PacketHeader {
    #[serde(rename = "cmUser")]
    pub cm_user: String,
    #[serde(rename = "cmPassword")]
    pub cm_password: String,
    #[serde(rename = "cmRequest")]
    pub cm_request: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PacketPayload {
    pub args: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketPayload,
}

/// Parses and schema-validates the raw packet bytes. `serde`'s own
/// missing-field/wrong-type errors are folded into [`ProtocolError`] so
/// the caller never has to special-case `serde_json::Error` (§4.6).
pub fn parse_packet(raw: &[u8]) -> Result<Packet, ProtocolError> {
    let value: Value = serde_json::from_slice(raw).map_err(|_| ProtocolError::WrongType("packet"))?;

    let header_value = value.get("header").ok_or(ProtocolError::MissingField("header"))?;
    let payload_value = value.get("payload").ok_or(ProtocolError::MissingField("payload"))?;

    let header: PacketHeader = serde_json::from_value(header_value.clone()).map_err(|_| ProtocolError::MissingField("header.*"))?;
    let payload: PacketPayload =
        serde_json::from_value(payload_value.clone()).map_err(|_| ProtocolError::MissingField("payload.args"))?;

    Ok(Packet { header, payload })
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialResponse {
    host: String,
    user: String,
    password: String,
    database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

/// Validates the packet already passed schema checks, authenticates the
/// in-packet principal, then dispatches by `cmRequest` (§4.6). v1 only
/// defines `GET_CR`; anything else is a [`ProtocolError::UnknownRequest`].
pub async fn handle(ctx: &ServerContext, packet: Packet) -> Result<Value, RequestError> {
    auth::authenticate(ctx.store.as_ref(), &packet.header.cm_user, &packet.header.cm_password).await?;

    match packet.header.cm_request.as_str() {
        "GET_CR" => get_credential(ctx, &packet).await,
        other => Err(RequestError::Protocol(ProtocolError::UnknownRequest(other.to_string()))),
    }
}

async fn get_credential(ctx: &ServerContext, packet: &Packet) -> Result<Value, RequestError> {
    let label = packet
        .payload
        .args
        .get("label")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField("args.label"))?;

    let authorized = auth::authorize(ctx.store.as_ref(), &packet.header.cm_user, label).await?;
    if !authorized {
        return Err(RequestError::Auth(AuthError));
    }

    let credential_row = ctx.store.fetch_credential(label).await?.ok_or(cm_store::StoreError::NotFound)?;
    let data_key_row = ctx.store.fetch_data_key(credential_row.cr_id).await?.ok_or(cm_store::StoreError::Integrity(
        "credential row has no matching data_key row".into(),
    ))?;

    let wrapped = cm_crypto::DataKey::from_parts(
        cm_crypto::KeyForm::Wrapped,
        data_key_row.wrapped_key,
        data_key_row.key_iv.try_into().map_err(|_| cm_crypto::CipherError::Length)?,
        data_key_row.cr_iv.try_into().map_err(|_| cm_crypto::CipherError::Length)?,
    );
    let plaintext_dk = ctx.hsm.unwrap(&wrapped)?;
    let credential: CredentialResponse = cm_crypto::cipher::decrypt(&plaintext_dk, &credential_row.ciphertext)?;

    ctx.audit.record(cm_store::AuditEvent::credential_event(
        credential_row.cr_id,
        label,
        cm_store::AuditAction::CredentialReleased,
    ));

    Ok(serde_json::to_value(credential).expect("CredentialResponse always serializes"))
}

/// Maps a handler outcome to the wire-level `(code, body)` pair (§4.6,
/// §7). Success carries the JSON-encoded result; failure carries an
/// opaque string never derived from the internal error's `Display`
/// (those are logged server-side only).
pub fn respond(result: Result<Value, RequestError>) -> (u16, String) {
    match result {
        Ok(value) => (200, value.to_string()),
        Err(err) => (err.response_code(), opaque_message(err.response_code())),
    }
}

fn opaque_message(code: u16) -> String {
    match code {
        400 => "authentication failed".to_string(),
        _ => "internal error".to_string(),
    }
}
