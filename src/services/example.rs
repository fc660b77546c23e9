//! Sample endpoints showing the text and binary handler shapes.

use super::{decode, encode};
use crate::registry::RegistryBuilder;
use serde::{Deserialize, Serialize};

pub(super) fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .text(
            "/api/example/text",
            "Combine a first and last name into a full name.",
            |text| {
                let Some(request) = decode::<NameRequest>(text) else {
                    return Ok(None);
                };
                encode(&NameResponse {
                    full_name: format!("{} {}", request.first_name, request.last_name),
                })
            },
        )
        .binary(
            "/api/example/binary",
            "Echo the request body.",
            |bytes| Ok(Some(bytes.to_vec())),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NameRequest {
    #[serde(default, alias = "firstName")]
    first_name: String,
    #[serde(default, alias = "lastName")]
    last_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct NameResponse {
    full_name: String,
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use crate::protocol::Response;
    use bytes::Bytes;

    #[test]
    fn test_full_name() {
        let fixture = Fixture::new();
        assert_eq!(
            fixture.call("/api/example/text", r#"{"FirstName":"Ada","lastName":"Lovelace"}"#),
            Response::Ok(Bytes::from_static(br#"{"FullName":"Ada Lovelace"}"#))
        );
        assert_eq!(fixture.call("/api/example/text", "[1, 2]"), Response::BadRequest);
    }

    #[test]
    fn test_binary_echo() {
        let fixture = Fixture::new();
        assert_eq!(
            fixture.call("/api/example/binary", "raw\x01"),
            Response::Ok(Bytes::from_static(b"raw\x01"))
        );
    }
}
