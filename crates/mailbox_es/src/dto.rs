use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{DtoError, Event};

/// Maps an event to the JSON document persisted by serializing backends.
///
/// Each bounded context declares a closed, internally tagged DTO enum
/// (`#[serde(tag = "type")]`) whose tag is the stable [`type_name`] of the
/// event variant. The JSON shape is part of the storage format: renaming a
/// field or a type name is a schema migration.
///
/// Converting `DTO -> event -> DTO` must be loss-less.
///
/// [`type_name`]: EventDto::type_name
pub trait EventDto: Event + Sized {
    /// The storage representation.
    type Dto: Serialize + DeserializeOwned + Send + Sync;

    /// Stable identifier persisted with the event.
    fn type_name(&self) -> &'static str;

    /// Converts the event into its storage representation.
    fn to_dto(&self) -> Self::Dto;

    /// Restores an event from its storage representation.
    fn from_dto(dto: Self::Dto) -> Result<Self, DtoError>;

    /// Serializes the event as a single line of JSON.
    fn to_json(&self) -> Result<String, DtoError> {
        serde_json::to_string(&self.to_dto()).map_err(DtoError::Serialize)
    }

    /// Deserializes an event written by [`to_json`](EventDto::to_json).
    fn from_json(json: &str) -> Result<Self, DtoError> {
        let dto = serde_json::from_str(json).map_err(DtoError::Deserialize)?;
        Self::from_dto(dto)
    }
}
