use async_trait::async_trait;
use configs::RestEndpointConfig;
use reqwest::{Method, Url};
use serde_json::Value;
use tracing::{debug, warn};

use models::context::{REQUEST_ID_HEADER, TENANT_HEADER};
use models::RequestContext;

use super::{Operation, ServiceClient};
use crate::errors::{Reply, ServiceError, ServiceResult};

/// Serializes operations into HTTP requests against a remote deployment of
/// the service and maps responses back into the local result shape.
pub struct HttpClient {
    http: reqwest::Client,
    service: String,
    endpoint: RestEndpointConfig,
}

impl HttpClient {
    pub fn new(http: reqwest::Client, service: String, endpoint: RestEndpointConfig) -> Self {
        Self { http, service, endpoint }
    }

    fn url(&self, base: &str, tail: &[&str]) -> Result<Url, ServiceError> {
        let mut url = Url::parse(&self.endpoint.origin()).map_err(|e| ServiceError::unreachable(&self.service, e))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ServiceError::unreachable(&self.service, "endpoint cannot carry a path"))?;
            segments.clear();
            segments.extend(base.split('/').filter(|s| !s.is_empty()));
            segments.push(&self.service);
            segments.extend(tail.iter().copied());
        }
        Ok(url)
    }

    /// Operation -> verb, URL and optional JSON body.
    fn request_parts(&self, op: &Operation) -> Result<(Method, Url, Option<Value>), ServiceError> {
        let base = self.endpoint.path.as_str();
        let parts = match op {
            Operation::List { query } => {
                let mut url = self.url(base, &[])?;
                url.query_pairs_mut().extend_pairs(query.to_params());
                (Method::GET, url, None)
            }
            Operation::ReadMany { ids, projection } => {
                let mut url = self.url(base, &[])?;
                {
                    let mut pairs = url.query_pairs_mut();
                    if ids.is_empty() {
                        // still a read-many, not a list
                        pairs.append_pair("ids", "");
                    }
                    for id in ids {
                        pairs.append_pair("ids", id);
                    }
                }
                if !projection.is_all() {
                    url.query_pairs_mut().append_pair("projection", &projection.to_param());
                }
                (Method::GET, url, None)
            }
            Operation::Read { id, projection } => {
                let mut url = self.url(base, &[id.as_str()])?;
                if !projection.is_all() {
                    url.query_pairs_mut().append_pair("projection", &projection.to_param());
                }
                (Method::GET, url, None)
            }
            Operation::Create { body } => (Method::POST, self.url(base, &[])?, Some(body.clone())),
            Operation::Replace { id, body } => (Method::PUT, self.url(base, &[id.as_str()])?, Some(body.clone())),
            Operation::PartialUpdate { id, patch } => (Method::PATCH, self.url(base, &[id.as_str()])?, Some(to_json(patch)?)),
            Operation::Remove { id } => (Method::DELETE, self.url(base, &[id.as_str()])?, None),
            Operation::Notify { envelope } => {
                let url = self.url(&self.endpoint.internal_path, &["notifications"])?;
                (Method::POST, url, Some(to_json(envelope)?))
            }
        };
        Ok(parts)
    }
}

#[async_trait]
impl ServiceClient for HttpClient {
    fn transport(&self) -> &'static str { "rest" }

    async fn call(&self, op: Operation, ctx: &RequestContext) -> ServiceResult {
        let (method, url, body) = self.request_parts(&op)?;
        debug!(service = %self.service, %method, %url, "remote call");
        let mut req = self.http.request(method, url).header(REQUEST_ID_HEADER, &ctx.request_id);
        if let Some(tenant) = ctx.tenant() {
            req = req.header(TENANT_HEADER, tenant);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(service = %self.service, error = %e, "remote call failed");
                return Err(ServiceError::unreachable(&self.service, e));
            }
        };
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(|e| ServiceError::unreachable(&self.service, e))?;
        let value: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| ServiceError::unreachable(&self.service, e))?
        };
        if (200..300).contains(&status) {
            Ok(Reply { status, value })
        } else {
            Err(ServiceError::from_response(&self.service, status, value))
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::Unexpected(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{NotificationEnvelope, NotificationType, Projection, Query};
    use serde_json::json;

    fn client() -> HttpClient {
        let endpoint = RestEndpointConfig {
            protocol: "http".into(),
            host: "users.local".into(),
            port: 8081,
            path: "/api/v1".into(),
            internal_path: "/internal".into(),
        };
        HttpClient::new(reqwest::Client::new(), "users".into(), endpoint)
    }

    #[test]
    fn maps_operations_to_verbs_and_paths() {
        let c = client();
        let cases = [
            (Operation::List { query: Query::default() }, Method::GET, "/api/v1/users"),
            (Operation::Read { id: "u1".into(), projection: Projection::all() }, Method::GET, "/api/v1/users/u1"),
            (Operation::Create { body: json!({}) }, Method::POST, "/api/v1/users"),
            (Operation::Replace { id: "u1".into(), body: json!({}) }, Method::PUT, "/api/v1/users/u1"),
            (Operation::Remove { id: "u1".into() }, Method::DELETE, "/api/v1/users/u1"),
            (
                Operation::Notify { envelope: NotificationEnvelope::new("schools", NotificationType::Added, vec![]) },
                Method::POST,
                "/internal/users/notifications",
            ),
        ];
        for (op, method, path) in cases {
            let (m, url, _) = c.request_parts(&op).unwrap();
            assert_eq!(m, method, "{}", op.name());
            assert_eq!(url.path(), path, "{}", op.name());
        }
    }

    #[test]
    fn read_many_sends_ids_and_projection() {
        let op = Operation::ReadMany { ids: vec!["a".into(), "b,c".into()], projection: Projection::parse("name") };
        let (_, url, body) = client().request_parts(&op).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let ids: Vec<&str> = pairs.iter().filter(|(k, _)| k == "ids").map(|(_, v)| v.as_str()).collect();
        assert_eq!(ids, vec!["a", "b,c"]);
        assert!(pairs.contains(&("projection".into(), "name".into())));
        assert!(body.is_none());
    }

    #[test]
    fn empty_read_many_is_not_a_list() {
        let op = Operation::ReadMany { ids: Vec::new(), projection: Projection::all() };
        let (_, url, _) = client().request_parts(&op).unwrap();
        assert_eq!(url.query(), Some("ids="));
    }

    #[test]
    fn ids_are_escaped_in_path() {
        let op = Operation::Read { id: "a/b".into(), projection: Projection::all() };
        let (_, url, _) = client().request_parts(&op).unwrap();
        assert_eq!(url.path(), "/api/v1/users/a%2Fb");
    }

    #[tokio::test]
    async fn connection_failure_is_502() {
        let endpoint = RestEndpointConfig {
            protocol: "http".into(),
            host: "127.0.0.1".into(),
            port: 1,
            path: "/api".into(),
            internal_path: "/internal".into(),
        };
        let c = HttpClient::new(reqwest::Client::new(), "users".into(), endpoint);
        let err = c.call(Operation::Read { id: "u1".into(), projection: Projection::all() }, &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), 502);
    }
}
