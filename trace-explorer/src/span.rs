use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use serde_with::NoneAsEmptyString;
use std::collections::BTreeMap;

pub type SpanId = String;
pub type TraceId = String;
pub type ServiceName = String;

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Kind {
    #[default]
    None,
    Client,
    Server,
    Producer,
    Consumer,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<ServiceName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn for_service<S: Into<String>>(service_name: S) -> Self {
        Self {
            service_name: Some(service_name.into()),
            ..Self::default()
        }
    }

    /// The service name, if present and not empty.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref().filter(|name| !name.is_empty())
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Annotation {
    pub timestamp: u64,
    pub value: String,
}

/// A single span in zipkin v2 shape. Timestamps and durations are microseconds.
#[serde_as]
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: TraceId,
    pub id: SpanId,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SpanId>,
    #[serde(default)]
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub debug: bool,
}

impl Span {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn local_service_name(&self) -> Option<&str> {
        self.local_endpoint.as_ref().and_then(Endpoint::service_name)
    }

    pub fn remote_service_name(&self) -> Option<&str> {
        self.remote_endpoint.as_ref().and_then(Endpoint::service_name)
    }

    /// Local then remote service name, skipping absent ones.
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.local_service_name()
            .into_iter()
            .chain(self.remote_service_name())
    }

    /// End of the span, when both timestamp and duration are known.
    pub fn end(&self) -> Option<u64> {
        Some(self.timestamp?.saturating_add(self.duration?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_parent_id_is_root() {
        let span: Span = serde_json::from_str(
            r#"{"traceId":"a","id":"1","parentId":"","timestamp":10,"duration":5}"#,
        )
        .unwrap();
        assert!(span.is_root());
        assert_eq!(span.kind, Kind::None);
        assert_eq!(span.end(), Some(15));
    }

    #[test]
    fn parses_zipkin_v2_span() {
        let span: Span = serde_json::from_str(
            r#"{
                "traceId": "bb1f0e21882325b8",
                "parentId": "bb1f0e21882325b8",
                "id": "c8c50ebd2abc179e",
                "kind": "CLIENT",
                "name": "get",
                "timestamp": 1541138169297572,
                "duration": 111121,
                "localEndpoint": {"serviceName": "frontend", "ipv4": "172.17.0.13"},
                "remoteEndpoint": {"serviceName": "backend", "port": 9000},
                "annotations": [{"timestamp": 1541138169297600, "value": "ws"}],
                "tags": {"http.path": "/api"}
            }"#,
        )
        .unwrap();
        assert_eq!(span.parent_id.as_deref(), Some("bb1f0e21882325b8"));
        assert_eq!(span.kind, Kind::Client);
        assert_eq!(
            span.service_names().collect::<Vec<_>>(),
            vec!["frontend", "backend"]
        );
        assert_eq!(span.remote_endpoint.unwrap().port, Some(9000));
        assert!(!span.shared);
    }

    #[test]
    fn empty_service_names_are_ignored() {
        let span = Span {
            local_endpoint: Some(Endpoint::for_service("")),
            remote_endpoint: Some(Endpoint::default()),
            ..Span::default()
        };
        assert_eq!(span.service_names().count(), 0);
    }

    #[test]
    fn whitespace_service_name_is_kept() {
        let span = Span {
            local_endpoint: Some(Endpoint::for_service(" ")),
            ..Span::default()
        };
        assert_eq!(span.service_names().collect::<Vec<_>>(), vec![" "]);
        assert_eq!(span.local_service_name(), Some(" "));
    }
}
