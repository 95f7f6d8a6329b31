//! Authenticated client for the instruction and datum query APIs.
//!
//! Every call is signed with `SNWS2` using the saved signing key and the
//! `X-SN-Date` header. Query-side calls are signed by a second builder bound
//! to the query environment, carrying the same token and key.
//!
//! POST calls move their query parameters into an
//! `application/x-www-form-urlencoded` body. The parameters are still signed
//! as canonical query parameters, and the `Content-Type` header is signed
//! because it is present.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use solarnet_auth::AuthorizationV2Builder;
use solarnet_core::response::describe_error;
use solarnet_core::{
    ApiResponse, ControlDatum, DatumFilter, DatumResults, Environment, Instruction,
    InstructionParameter, InstructionState, SolarQueryApi, SolarUserApi,
};
use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::transport::{HttpRequest, Transport};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Signed access to the SolarUser instruction API and SolarQuery datum API.
#[derive(Debug)]
pub struct SolarNetClient {
    transport: Arc<dyn Transport>,
    user_api: SolarUserApi,
    query_api: SolarQueryApi,
    auth: RwLock<AuthorizationV2Builder>,
    query_auth: RwLock<AuthorizationV2Builder>,
}

impl SolarNetClient {
    /// Create a client whose user API lives in `auth`'s environment.
    ///
    /// `query_environment` defaults to the same environment. The query-side
    /// builder is a clone of `auth` bound to that environment.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        auth: AuthorizationV2Builder,
        query_environment: Option<Environment>,
    ) -> Self {
        let user_env = auth.environment().clone();
        let query_env = query_environment.unwrap_or_else(|| user_env.clone());
        let query_auth = auth.with_environment(query_env.clone());
        Self {
            transport,
            user_api: SolarUserApi::new(user_env),
            query_api: SolarQueryApi::new(query_env),
            auth: RwLock::new(auth),
            query_auth: RwLock::new(query_auth),
        }
    }

    /// The user API URL helper.
    #[must_use]
    pub fn user_api(&self) -> &SolarUserApi {
        &self.user_api
    }

    /// The query API URL helper.
    #[must_use]
    pub fn query_api(&self) -> &SolarQueryApi {
        &self.query_api
    }

    /// Whether both builders hold a valid signing key.
    #[must_use]
    pub fn signing_key_valid(&self) -> bool {
        self.auth.read().signing_key_valid() && self.query_auth.read().signing_key_valid()
    }

    /// Derive a signing key from `secret` for today and save it on both builders.
    pub fn save_signing_key(&self, secret: &str) {
        let now = Utc::now();
        let mut auth = self.auth.write();
        auth.date(now).save_signing_key(secret);
        if let Some(key) = auth.signing_key() {
            self.query_auth.write().set_signing_key(key.as_bytes(), &now);
        }
    }

    /// Install a signing key issued for `date` on both builders.
    pub fn set_signing_key(&self, key: &[u8], date: &DateTime<Utc>) {
        self.auth.write().set_signing_key(key, date);
        self.query_auth.write().set_signing_key(key, date);
    }

    /// Queue an instruction for a node.
    pub async fn queue_instruction(
        &self,
        topic: &str,
        parameters: &[InstructionParameter],
        node_id: u64,
    ) -> ControlResult<Instruction> {
        let url = self
            .user_api
            .queue_instruction_url(topic, parameters, node_id);
        self.fetch::<Instruction>(Method::POST, &url, false)
            .await?
            .ok_or_else(|| ControlError::Api {
                message: "No instruction returned".to_owned(),
                code: None,
            })
    }

    /// Change the state of an instruction, e.g. to cancel it with `Declined`.
    pub async fn update_instruction_state(
        &self,
        instruction_id: u64,
        state: InstructionState,
    ) -> ControlResult<()> {
        let url = self
            .user_api
            .update_instruction_state_url(instruction_id, state);
        self.fetch::<serde_json::Value>(Method::POST, &url, false)
            .await
            .map(|_| ())
    }

    /// Fetch one instruction.
    pub async fn view_instruction(&self, instruction_id: u64) -> ControlResult<Option<Instruction>> {
        let url = self.user_api.view_instruction_url(instruction_id);
        self.fetch(Method::GET, &url, false).await
    }

    /// List the unfinished instructions of a node.
    pub async fn view_pending_instructions(&self, node_id: u64) -> ControlResult<Vec<Instruction>> {
        let url = self.user_api.view_pending_instructions_url(node_id);
        Ok(self
            .fetch::<Vec<Instruction>>(Method::GET, &url, false)
            .await?
            .unwrap_or_default())
    }

    /// The most recent datum of each source matching `filter`.
    pub async fn most_recent_datum(&self, filter: &DatumFilter) -> ControlResult<Vec<ControlDatum>> {
        let url = self.query_api.most_recent_datum_url(filter);
        Ok(self
            .fetch::<DatumResults<ControlDatum>>(Method::GET, &url, true)
            .await?
            .map(|r| r.results)
            .unwrap_or_default())
    }

    /// Sign and send a request, unwrapping the response envelope.
    ///
    /// Returns the envelope `data`, which may be absent on success.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query_side: bool,
    ) -> ControlResult<Option<T>> {
        let request = self.signed_request(method, url, query_side)?;
        debug!(method = %request.method, url = %request.url, "Sending SolarNetwork request");

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            let message = serde_json::from_slice::<ApiResponse<serde_json::Value>>(&response.body)
                .ok()
                .and_then(|r| r.message.map(|m| describe_error(&m, r.code.as_deref())))
                .unwrap_or_else(|| response.status_text().to_owned());
            return Err(ControlError::Status {
                url: url.to_owned(),
                status: response.status.as_u16(),
                message,
            });
        }

        let envelope: ApiResponse<T> =
            serde_json::from_slice(&response.body).map_err(|source| ControlError::Decode {
                url: url.to_owned(),
                source,
            })?;
        if !envelope.success {
            return Err(ControlError::Api {
                message: envelope
                    .message
                    .unwrap_or_else(|| "Request failed".to_owned()),
                code: envelope.code,
            });
        }
        Ok(envelope.data)
    }

    fn signed_request(&self, method: Method, url: &str, query_side: bool) -> ControlResult<HttpRequest> {
        let auth = if query_side {
            self.query_auth.read()
        } else {
            self.auth.read()
        };
        if !auth.signing_key_valid() {
            return Err(ControlError::SigningKeyNotConfigured);
        }

        let mut descriptor = auth.request();
        descriptor
            .method(method.clone())
            .set_use_sn_date(true)
            .url(url, false)?;

        let (request_url, body) = if method == Method::POST {
            descriptor.content_type(FORM_CONTENT_TYPE)?;
            let mut form = form_urlencoded::Serializer::new(String::new());
            for (key, values) in descriptor.query_parameters() {
                for value in values {
                    form.append_pair(key, value);
                }
            }
            let base = url.split_once('?').map_or(url, |(base, _)| base);
            (base.to_owned(), Some(Bytes::from(form.finish())))
        } else {
            (url.to_owned(), None)
        };

        let authorization = auth.sign_with_saved_key(&descriptor)?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&authorization)?);
        headers.insert(
            HeaderName::from_static("x-sn-date"),
            header_value(&descriptor.request_date_header_value())?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        }

        Ok(HttpRequest {
            method,
            url: request_url,
            headers,
            body,
        })
    }
}

fn header_value(value: &str) -> ControlResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| ControlError::InvalidHeader(value.to_owned()))
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use solarnet_auth::verify_authorization;

    use super::*;
    use crate::transport::HttpResponse;
    use crate::transport::testing::{RecordingTransport, ok_json};

    const TOKEN: &str = "test-token";
    const SECRET: &str = "test-secret";

    fn client_with(transport: &RecordingTransport) -> SolarNetClient {
        let auth = AuthorizationV2Builder::new(TOKEN, Environment::new("http", "localhost", None));
        let client = SolarNetClient::new(
            Arc::new(transport.clone()),
            auth,
            Some(Environment::new("http", "query.localhost", None)),
        );
        client.save_signing_key(SECRET);
        client
    }

    fn to_parts(request: &HttpRequest, host: &str) -> http::request::Parts {
        let mut builder = http::Request::builder()
            .method(request.method.clone())
            .uri(request.url.as_str())
            .header("host", host);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_should_fail_without_signing_key() {
        let transport = RecordingTransport::new(|_| ok_json(serde_json::json!([])));
        let auth = AuthorizationV2Builder::new(TOKEN, Environment::new("http", "localhost", None));
        let client = SolarNetClient::new(Arc::new(transport.clone()), auth, None);
        let err = client.view_pending_instructions(1).await.unwrap_err();
        assert!(matches!(err, ControlError::SigningKeyNotConfigured));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_sign_get_with_sn_date() {
        let transport = RecordingTransport::new(|_| ok_json(serde_json::json!([])));
        let client = client_with(&transport);
        client.view_pending_instructions(123).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(
            request.url,
            "http://localhost/solaruser/api/v1/sec/instr/viewPending?nodeId=123"
        );
        assert!(request.headers.contains_key("x-sn-date"));
        let authorization = request.headers[AUTHORIZATION].to_str().unwrap();
        assert!(authorization.starts_with("SNWS2 Credential=test-token,SignedHeaders=host;x-sn-date,"));

        let parts = to_parts(request, "localhost");
        assert!(verify_authorization(&parts, None, |_| Some(SECRET.to_owned())).is_ok());
    }

    #[tokio::test]
    async fn test_should_sign_query_calls_for_query_host() {
        let transport = RecordingTransport::new(|_| ok_json(serde_json::json!({ "results": [] })));
        let client = client_with(&transport);
        let datums = client
            .most_recent_datum(&DatumFilter::for_source(1, "/power/switch/1"))
            .await
            .unwrap();
        assert!(datums.is_empty());

        let request = &transport.requests()[0];
        assert!(request.url.starts_with("http://query.localhost/solarquery/api/v1/sec/datum/mostRecent?"));
        let parts = to_parts(request, "query.localhost");
        assert!(verify_authorization(&parts, None, |_| Some(SECRET.to_owned())).is_ok());
    }

    #[tokio::test]
    async fn test_should_post_form_body_signed_as_query() {
        let transport = RecordingTransport::new(|_| {
            ok_json(serde_json::json!({ "id": 9, "state": "Queued", "topic": "SetControlParameter" }))
        });
        let client = client_with(&transport);
        let instruction = client
            .queue_instruction(
                "SetControlParameter",
                &[InstructionParameter::new("/power/switch/1", "1")],
                123,
            )
            .await
            .unwrap();
        assert_eq!(instruction.id, 9);

        let request = &transport.requests()[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "http://localhost/solaruser/api/v1/sec/instr/add");
        assert_eq!(request.headers[CONTENT_TYPE], FORM_CONTENT_TYPE);
        let body = String::from_utf8(request.body.clone().unwrap().to_vec()).unwrap();
        assert_eq!(
            body,
            "nodeId=123&parameters%5B0%5D.name=%2Fpower%2Fswitch%2F1&parameters%5B0%5D.value=1&topic=SetControlParameter"
        );
        let authorization = request.headers[AUTHORIZATION].to_str().unwrap();
        assert!(authorization.contains("SignedHeaders=content-type;host;x-sn-date,"));

        // the server sees the form parameters as query parameters
        let mut signed = request.clone();
        signed.url = format!("{}?{body}", request.url);
        let parts = to_parts(&signed, "localhost");
        assert!(verify_authorization(&parts, None, |_| Some(SECRET.to_owned())).is_ok());
    }

    #[tokio::test]
    async fn test_should_surface_api_failure() {
        let transport = RecordingTransport::new(|_| {
            HttpResponse::new(
                StatusCode::OK,
                r#"{"success":false,"message":"Not allowed","code":"SEC.1"}"#,
            )
        });
        let client = client_with(&transport);
        let err = client.view_instruction(1).await.unwrap_err();
        assert_eq!(err.to_string(), "Not allowed (SEC.1)");
    }

    #[tokio::test]
    async fn test_should_surface_http_status() {
        let transport = RecordingTransport::new(|_| HttpResponse::new(StatusCode::FORBIDDEN, "nope"));
        let client = client_with(&transport);
        let err = client.view_instruction(1).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::Status { status: 403, ref message, .. } if message == "Forbidden"
        ));
    }

    #[tokio::test]
    async fn test_should_use_envelope_message_for_http_status() {
        let transport = RecordingTransport::new(|_| {
            HttpResponse::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"success":false,"message":"Bad state","code":"V.2"}"#,
            )
        });
        let client = client_with(&transport);
        let err = client
            .update_instruction_state(1, InstructionState::Declined)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Status { status: 422, ref message, .. } if message == "Bad state (V.2)"
        ));
    }

    #[tokio::test]
    async fn test_should_report_decode_error() {
        let transport = RecordingTransport::new(|_| HttpResponse::new(StatusCode::OK, "not json"));
        let client = client_with(&transport);
        let err = client.view_instruction(1).await.unwrap_err();
        assert!(matches!(err, ControlError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_should_install_refreshed_key_on_both_builders() {
        let transport = RecordingTransport::new(|_| ok_json(serde_json::json!([])));
        let auth = AuthorizationV2Builder::new(TOKEN, Environment::new("http", "localhost", None));
        let client = SolarNetClient::new(Arc::new(transport.clone()), auth, None);
        assert!(!client.signing_key_valid());
        client.set_signing_key(&[1, 2, 3], &Utc::now());
        assert!(client.signing_key_valid());
    }
}
