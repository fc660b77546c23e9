//! Self-describing endpoints backed by the registry.

use super::encode;
use crate::registry::{RegistryBuilder, ServiceSummary};

pub(super) fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .meta_text(
            "/api/docs",
            "Describe the endpoint whose path is the request body.",
            |text, registry| match registry.lookup(text.trim()) {
                Some(service) => encode(&service.summary()),
                None => Ok(None),
            },
        )
        .meta_text(
            "/api/docs/all",
            "Describe every registered endpoint.",
            |_, registry| {
                let all: Vec<ServiceSummary<'_>> =
                    registry.services().map(|service| service.summary()).collect();
                encode(&all)
            },
        )
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use crate::protocol::Response;

    #[test]
    fn test_describe_one() {
        let fixture = Fixture::new();
        let doc: serde_json::Value = match fixture.call("/api/docs", "/API/Example/Binary\r\n") {
            Response::Ok(body) => serde_json::from_slice(&body).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(doc["Endpoint"], "/api/example/binary");
        assert_eq!(doc["Payload"], "Binary");
        assert_eq!(doc["Meta"], false);

        assert_eq!(fixture.call("/api/docs", "/api/nothing"), Response::BadRequest);
    }

    #[test]
    fn test_describe_all() {
        let fixture = Fixture::new();
        let all: Vec<serde_json::Value> = match fixture.call("/api/docs/all", "") {
            Response::Ok(body) => serde_json::from_slice(&body).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(all.len(), fixture.registry.len());
        assert!(all
            .iter()
            .any(|doc| doc["Endpoint"] == "/api/docs" && doc["Meta"] == true));
    }
}
