use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Error;

// Values are stored as JSON: self-describing, so entities survive field
// additions and removals across versions without a schema registry.

pub(crate) fn encode<T>(value: &T) -> Result<Vec<u8>, Error>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(value).map_err(Error::Encode)
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(bytes).map_err(Error::Decode)
}
