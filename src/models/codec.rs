// JSON codec for native_model so stored records keep the same serde shape as the REST payloads.

use serde::de::DeserializeOwned;
use serde::Serialize;

pub struct JsonCodec;

impl<T: Serialize> native_model::Encode<T> for JsonCodec {
    type Error = serde_json::Error;

    fn encode(obj: &T) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(obj)
    }
}

impl<T: DeserializeOwned> native_model::Decode<T> for JsonCodec {
    type Error = serde_json::Error;

    fn decode(data: Vec<u8>) -> Result<T, Self::Error> {
        serde_json::from_slice(&data)
    }
}
