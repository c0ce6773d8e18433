//! Command encoder and decoder.
//!
//! A command becomes a [`LogRecord`] with the method tag in the `method` metadata field and a JSON payload. `Set` and
//! `Update` carry the full snapshot, `Delete` carries `{"id": ...}` only.

use serde::Deserialize;
use serde::Serialize;

use crate::error::CacheError;
use crate::error::DecodeError;
use crate::traits::Entity;
use crate::types::Command;
use crate::types::LogRecord;
use crate::types::Method;
use crate::types::METHOD_FIELD;

#[derive(Serialize)]
struct IdRef<'a, I> {
    id: &'a I,
}

#[derive(Deserialize)]
struct IdOnly<I> {
    id: I,
}

pub fn encode<E: Entity>(command: &Command<E>) -> Result<LogRecord, CacheError> {
    let payload = match command {
        Command::Set(e) | Command::Update(e) => serde_json::to_vec(e),
        Command::Delete(id) => serde_json::to_vec(&IdRef { id }),
    }
    .map_err(CacheError::Encode)?;

    Ok(LogRecord::new(payload).with_meta(METHOD_FIELD, command.method().tag()))
}

pub fn decode<E: Entity>(record: &LogRecord) -> Result<Command<E>, DecodeError> {
    let method = record
        .method_tag()
        .ok_or(DecodeError::MissingMethod)?
        .parse::<Method>()
        .map_err(DecodeError::UnknownMethod)?;

    Ok(match method {
        Method::Set => Command::Set(serde_json::from_slice(&record.payload)?),
        Method::Update => Command::Update(serde_json::from_slice(&record.payload)?),
        Method::Delete => Command::Delete(serde_json::from_slice::<IdOnly<E::Id>>(&record.payload)?.id),
    })
}
