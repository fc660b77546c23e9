//! Service registry and request dispatch.
//!
//! The registry maps a lowercase path to a [`ServiceDescriptor`]. It is
//! assembled once at startup through [`RegistryBuilder`] and is read-only
//! afterwards, so it is shared between connections behind an `Arc`.

use crate::protocol::{ParsedRequest, Response};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{error, trace};

/// Failure raised by a handler. Mapped to `500 Internal Server Error`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// `Ok(None)` rejects the input (400), `Err` is a fault (500).
pub type HandlerResult<T> = Result<Option<T>, HandlerError>;

type TextFn = dyn Fn(&str) -> HandlerResult<String> + Send + Sync;
type BinaryFn = dyn Fn(&[u8]) -> HandlerResult<Vec<u8>> + Send + Sync;
type MetaTextFn = dyn Fn(&str, &ServiceRegistry) -> HandlerResult<String> + Send + Sync;
type MetaBinaryFn = dyn Fn(&[u8], &ServiceRegistry) -> HandlerResult<Vec<u8>> + Send + Sync;

/// How the request body is handed to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayloadKind {
    Text,
    Binary,
}

/// Handler reference held by a descriptor.
pub enum Handler {
    Text(Box<TextFn>),
    Binary(Box<BinaryFn>),
    MetaText(Box<MetaTextFn>),
    MetaBinary(Box<MetaBinaryFn>),
}

impl Handler {
    fn kind(&self) -> PayloadKind {
        match self {
            Handler::Text(_) | Handler::MetaText(_) => PayloadKind::Text,
            Handler::Binary(_) | Handler::MetaBinary(_) => PayloadKind::Binary,
        }
    }

    fn is_meta(&self) -> bool {
        matches!(self, Handler::MetaText(_) | Handler::MetaBinary(_))
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Handler::Text(_) => "Text",
            Handler::Binary(_) => "Binary",
            Handler::MetaText(_) => "MetaText",
            Handler::MetaBinary(_) => "MetaBinary",
        };
        f.write_str(name)
    }
}

/// A registered endpoint.
#[derive(Debug)]
pub struct ServiceDescriptor {
    path: String,
    description: String,
    handler: Handler,
}

impl ServiceDescriptor {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> PayloadKind {
        self.handler.kind()
    }

    /// Whether the handler receives the full registry.
    pub fn is_meta(&self) -> bool {
        self.handler.is_meta()
    }

    /// Serializable summary used by introspection endpoints.
    pub fn summary(&self) -> ServiceSummary<'_> {
        ServiceSummary {
            endpoint: &self.path,
            description: &self.description,
            payload: self.kind(),
            meta: self.is_meta(),
        }
    }

    /// Run the handler and map its outcome to a response.
    fn invoke(&self, body: &[u8], registry: &ServiceRegistry) -> Response {
        let outcome: HandlerResult<Bytes> = match &self.handler {
            Handler::Text(f) => {
                let text = String::from_utf8_lossy(body);
                f(text.as_ref()).map(|r| r.map(Bytes::from))
            }
            Handler::MetaText(f) => {
                let text = String::from_utf8_lossy(body);
                f(text.as_ref(), registry).map(|r| r.map(Bytes::from))
            }
            Handler::Binary(f) => f(body).map(|r| r.map(Bytes::from)),
            Handler::MetaBinary(f) => f(body, registry).map(|r| r.map(Bytes::from)),
        };

        match outcome {
            Ok(Some(payload)) => Response::Ok(payload),
            Ok(None) => Response::BadRequest,
            Err(e) => {
                error!(path = %self.path, error = %e, "Handler failed");
                Response::InternalError
            }
        }
    }
}

/// JSON view of a descriptor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSummary<'a> {
    pub endpoint: &'a str,
    pub description: &'a str,
    pub payload: PayloadKind,
    pub meta: bool,
}

/// Registry construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("path registered twice: {0}")]
    DuplicatePath(String),
}

/// Collects handlers before freezing them into a [`ServiceRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    services: Vec<ServiceDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler receiving the body as UTF-8 text.
    pub fn text<F>(self, path: &str, description: &str, f: F) -> Self
    where
        F: Fn(&str) -> HandlerResult<String> + Send + Sync + 'static,
    {
        self.add(path, description, Handler::Text(Box::new(f)))
    }

    /// Register a handler receiving the raw body bytes.
    pub fn binary<F>(self, path: &str, description: &str, f: F) -> Self
    where
        F: Fn(&[u8]) -> HandlerResult<Vec<u8>> + Send + Sync + 'static,
    {
        self.add(path, description, Handler::Binary(Box::new(f)))
    }

    /// Register a text handler that also receives the registry.
    pub fn meta_text<F>(self, path: &str, description: &str, f: F) -> Self
    where
        F: Fn(&str, &ServiceRegistry) -> HandlerResult<String> + Send + Sync + 'static,
    {
        self.add(path, description, Handler::MetaText(Box::new(f)))
    }

    /// Register a binary handler that also receives the registry.
    pub fn meta_binary<F>(self, path: &str, description: &str, f: F) -> Self
    where
        F: Fn(&[u8], &ServiceRegistry) -> HandlerResult<Vec<u8>> + Send + Sync + 'static,
    {
        self.add(path, description, Handler::MetaBinary(Box::new(f)))
    }

    fn add(mut self, path: &str, description: &str, handler: Handler) -> Self {
        self.services.push(ServiceDescriptor {
            path: path.to_lowercase(),
            description: description.to_string(),
            handler,
        });
        self
    }

    /// Freeze the registry. Fails if two handlers share a path.
    pub fn build(self) -> Result<ServiceRegistry, RegistryError> {
        let mut services = BTreeMap::new();
        for service in self.services {
            if services.contains_key(&service.path) {
                return Err(RegistryError::DuplicatePath(service.path));
            }
            services.insert(service.path.clone(), service);
        }
        Ok(ServiceRegistry { services })
    }
}

/// Immutable path → handler table.
#[derive(Debug)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Find the descriptor for a path, ignoring case.
    pub fn lookup(&self, path: &str) -> Option<&ServiceDescriptor> {
        self.services.get(&path.to_lowercase())
    }

    /// All descriptors, ordered by path.
    pub fn services(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Route a request to its handler.
    ///
    /// Never panics: a panicking handler is reported as an internal error.
    pub fn dispatch(&self, request: &ParsedRequest) -> Response {
        let Some(service) = self.lookup(&request.path) else {
            trace!(path = %request.path, "No service for path");
            return Response::NotFound;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| service.invoke(&request.body, self))) {
            Ok(response) => response,
            Err(_) => {
                error!(path = %service.path, "Handler panicked");
                Response::InternalError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str, body: &[u8]) -> ParsedRequest {
        ParsedRequest {
            path: path.to_lowercase(),
            body: Bytes::copy_from_slice(body),
            ..Default::default()
        }
    }

    fn registry() -> ServiceRegistry {
        ServiceRegistry::builder()
            .text("/Echo/Text", "echo text", |text| Ok(Some(text.to_uppercase())))
            .binary("/echo/binary", "echo bytes", |bytes| Ok(Some(bytes.to_vec())))
            .text("/reject", "always rejects", |_| Ok(None))
            .text("/fault", "always fails", |_| Err("boom".into()))
            .text("/panic", "always panics", |_| panic!("handler panic"))
            .meta_text("/count", "counts services", |_, registry| {
                Ok(Some(registry.len().to_string()))
            })
            .meta_binary("/describe", "summarises a service", |path, registry| {
                let path = String::from_utf8_lossy(path);
                Ok(registry
                    .lookup(&path)
                    .map(|service| service.description().as_bytes().to_vec()))
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let result = ServiceRegistry::builder()
            .text("/api/x", "", |_| Ok(None))
            .binary("/API/X", "", |_| Ok(None))
            .build();
        assert_eq!(
            result.unwrap_err(),
            RegistryError::DuplicatePath("/api/x".to_string())
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = registry();
        assert!(registry.lookup("/ECHO/TEXT").is_some());
        assert!(registry.lookup("/echo/text").is_some());
        assert!(registry.lookup("/echo").is_none());
    }

    #[test]
    fn test_descriptor_metadata() {
        let registry = registry();
        let text = registry.lookup("/echo/text").unwrap();
        assert_eq!(text.kind(), PayloadKind::Text);
        assert!(!text.is_meta());

        let binary = registry.lookup("/echo/binary").unwrap();
        assert_eq!(binary.kind(), PayloadKind::Binary);

        let meta = registry.lookup("/count").unwrap();
        assert!(meta.is_meta());
    }

    #[test]
    fn test_dispatch_text_and_binary() {
        let registry = registry();
        assert_eq!(
            registry.dispatch(&request("/echo/TEXT", b"hi")),
            Response::Ok(Bytes::from_static(b"HI"))
        );
        assert_eq!(
            registry.dispatch(&request("/echo/binary", &[0, 159, 255])),
            Response::Ok(Bytes::from_static(&[0, 159, 255]))
        );
    }

    #[test]
    fn test_dispatch_outcomes() {
        let registry = registry();
        assert_eq!(registry.dispatch(&request("/nowhere", b"")), Response::NotFound);
        assert_eq!(registry.dispatch(&request("/reject", b"")), Response::BadRequest);
        assert_eq!(registry.dispatch(&request("/fault", b"")), Response::InternalError);
        assert_eq!(registry.dispatch(&request("/panic", b"")), Response::InternalError);
    }

    #[test]
    fn test_meta_handler_sees_registry() {
        let registry = registry();
        assert_eq!(
            registry.dispatch(&request("/count", b"")),
            Response::Ok(Bytes::from_static(b"7"))
        );
        assert_eq!(
            registry.dispatch(&request("/describe", b"/echo/binary")),
            Response::Ok(Bytes::from_static(b"echo bytes"))
        );
        assert_eq!(registry.dispatch(&request("/describe", b"/none")), Response::BadRequest);
        assert!(registry.lookup("/describe").unwrap().is_meta());
        assert_eq!(registry.lookup("/describe").unwrap().kind(), PayloadKind::Binary);
    }
}
