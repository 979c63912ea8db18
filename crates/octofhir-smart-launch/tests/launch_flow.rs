//! End-to-end EHR launch flows against a mock EHR.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use octofhir_smart_launch::error::GENERIC_LAUNCH_FAILURE;
use octofhir_smart_launch::prelude::*;
use octofhir_smart_launch::smart::session::{LaunchSession, LaunchStatus, keys};

const CLIENT_ID: &str = "CLIENT_ID";
const KID: &str = "ehr-key-1";

struct SigningKey {
    encoding: EncodingKey,
    jwk: Value,
}

fn signing_key() -> &'static SigningKey {
    static KEY: OnceLock<SigningKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        let pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();
        SigningKey {
            encoding: EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
            jwk: json!({
                "kty": "RSA",
                "kid": KID,
                "use": "sig",
                "alg": "RS256",
                "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
            }),
        }
    })
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn id_token_claims(aud: &str) -> Value {
    json!({
        "sub": "SUBJECT",
        "aud": aud,
        "iat": now(),
        "exp": now() + 4 * 3600,
        "fhirUser": "https://fhir-ehr.example.com/r4/product-id/Practitioner/PRACTITIONER_ID"
    })
}

fn signed_id_token(aud: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    encode(&header, &id_token_claims(aud), &signing_key().encoding).unwrap()
}

fn unsigned_id_token(aud: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(id_token_claims(aud).to_string());
    format!("{header}.{payload}.")
}

fn token_body(id_token: &str) -> Value {
    json!({
        "scope": "patient/*.read patient/Patient.read launch openid profile online_scope",
        "access_token": "ACCESS TOKEN",
        "token_type": "Bearer",
        "expires_in": 570,
        "patient": "PATIENT ID",
        "smart_style_url": "http://my-server.org/style.css",
        "id_token": id_token,
        "refresh_token": "refresh token",
        "ehr_domain": "example.com"
    })
}

/// Mock EHR exposing metadata, token, OpenID configuration and JWKS.
struct MockEhr {
    server: MockServer,
}

impl MockEhr {
    async fn start() -> Self {
        let server = MockServer::start().await;
        let uri = server.uri();

        Mock::given(method("GET"))
            .and(path("/fhir/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resourceType": "Conformance",
                "rest": [{
                    "security": {
                        "extension": [{
                            "url": "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris",
                            "extension": [
                                { "url": "token", "valueUri": format!("{uri}/token") },
                                { "url": "authorize", "valueUri": format!("{uri}/authorize") }
                            ]
                        }]
                    }
                }]
            })))
            .mount(&server)
            .await;

        Self { server }
    }

    fn issuer(&self) -> String {
        format!("{}/fhir", self.server.uri())
    }

    async fn mount_keys(&self, expected_fetches: u64) {
        Mock::given(method("GET"))
            .and(path("/fhir/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": self.issuer(),
                "jwks_uri": format!("{}/jwks", self.server.uri())
            })))
            .expect(expected_fetches)
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "keys": [signing_key().jwk] })),
            )
            .expect(expected_fetches)
            .mount(&self.server)
            .await;
    }

    async fn mount_token(&self, body: Value, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    async fn token_form(&self) -> HashMap<String, String> {
        let requests = self.server.received_requests().await.unwrap();
        let request = requests
            .iter()
            .find(|r| r.url.path() == "/token")
            .expect("token endpoint was called");
        url::form_urlencoded::parse(&request.body)
            .into_owned()
            .collect()
    }
}

fn service(client: Client, config: SmartLaunchConfig) -> SmartLaunchService {
    SmartLaunchService::new(
        config.with_allow_http(true),
        Arc::new(InMemoryClientDirectory::new(vec![client])),
    )
    .unwrap()
}

fn query(redirect: &LaunchRedirect) -> HashMap<String, String> {
    redirect
        .authorization_url
        .query_pairs()
        .into_owned()
        .collect()
}

#[tokio::test]
async fn scenario_a_full_launch_with_verified_id_token() {
    let ehr = MockEhr::start().await;
    ehr.mount_keys(1).await;
    ehr.mount_token(token_body(&signed_id_token(CLIENT_ID)), 1)
        .await;

    let client = Client::new(ehr.issuer(), CLIENT_ID).with_org_id("ORG_ID");
    let service = service(client, SmartLaunchConfig::default());
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();

    assert_eq!(redirect.authorization_url.path(), "/authorize");
    let params = query(&redirect);
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["client_id"], CLIENT_ID);
    assert_eq!(params["scope"], service.config().default_scope);
    assert_eq!(
        params["redirect_uri"],
        service.config().redirect_uri.as_str()
    );
    assert_eq!(params["aud"], ehr.issuer());
    assert_eq!(params["launch"], "LAUNCH_ID");
    assert_eq!(params["state"], redirect.state);
    assert!(!params.contains_key("code_challenge"));

    let result = service
        .complete_launch(&session, &CallbackParams::new("1234", &redirect.state))
        .await
        .unwrap();

    assert_eq!(result.subject, "SUBJECT");
    assert_eq!(result.access_token, "ACCESS TOKEN");
    assert_eq!(result.patient_id.as_deref(), Some("PATIENT ID"));
    assert_eq!(result.practitioner_id.as_deref(), Some("PRACTITIONER_ID"));
    assert_eq!(result.org_id.as_deref(), Some("ORG_ID"));
    assert_eq!(result.fhir_uri, ehr.issuer());
    assert_eq!(result.ehr_domain.as_deref(), Some("example.com"));
    assert_eq!(
        result.style_url.as_deref(),
        Some("http://my-server.org/style.css")
    );
    assert_eq!(result.refresh_token.as_deref(), Some("refresh token"));
    assert_eq!(result.expires_in, Some(570));

    let form = ehr.token_form().await;
    assert_eq!(form["grant_type"], "authorization_code");
    assert_eq!(form["code"], "1234");
    assert_eq!(form["client_id"], CLIENT_ID);
    assert!(!form.contains_key("code_verifier"));
}

#[tokio::test]
async fn scenario_b_forged_state_never_reaches_token_endpoint() {
    let ehr = MockEhr::start().await;
    ehr.mount_token(token_body(&signed_id_token(CLIENT_ID)), 0)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();

    let err = service
        .complete_launch(&session, &CallbackParams::new("1234", "forged-state"))
        .await
        .unwrap_err();

    assert!(matches!(err, SmartError::InvalidState));
    assert_eq!(err.to_string(), "An error occurred. Invalid state id");
    assert_eq!(err.user_message(), GENERIC_LAUNCH_FAILURE);

    // A forged callback does not consume the pending launch
    assert_eq!(
        LaunchSession::new(&session).status().await.unwrap(),
        Some(LaunchStatus::Launching)
    );
}

#[tokio::test]
async fn scenario_c_replayed_callback_is_rejected() {
    let ehr = MockEhr::start().await;
    ehr.mount_keys(1).await;
    ehr.mount_token(token_body(&signed_id_token(CLIENT_ID)), 1)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();
    let callback = CallbackParams::new("1234", &redirect.state);

    service.complete_launch(&session, &callback).await.unwrap();
    let err = service
        .complete_launch(&session, &callback)
        .await
        .unwrap_err();

    assert!(matches!(err, SmartError::InvalidStatus { .. }));
    assert!(err.to_string().contains("refreshed the page"));
    assert_eq!(err.user_message(), GENERIC_LAUNCH_FAILURE);
}

#[tokio::test]
async fn scenario_d_unknown_issuer_makes_no_http_calls() {
    let ehr = MockEhr::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&ehr.server)
        .await;

    let service = service(
        Client::new("https://registered.example.com/fhir", CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let err = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap_err();

    assert!(matches!(err, SmartError::UnknownIssuer { .. }));
    assert_eq!(err.user_message(), GENERIC_LAUNCH_FAILURE);
    assert!(ehr.server.received_requests().await.unwrap().is_empty());
    assert!(session.snapshot().await.is_empty());
}

#[tokio::test]
async fn duplicated_concurrent_callbacks_redeem_once() {
    let ehr = MockEhr::start().await;
    ehr.mount_keys(1).await;
    ehr.mount_token(token_body(&signed_id_token(CLIENT_ID)), 1)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();
    let callback = CallbackParams::new("1234", &redirect.state);

    let (first, second) = tokio::join!(
        service.complete_launch(&session, &callback),
        service.complete_launch(&session, &callback)
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(SmartError::is_state_error)
    );
}

#[tokio::test]
async fn pkce_challenge_matches_verifier_sent_to_token_endpoint() {
    let ehr = MockEhr::start().await;
    ehr.mount_keys(1).await;
    ehr.mount_token(token_body(&signed_id_token(CLIENT_ID)), 1)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID).with_pkce(true),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();
    let params = query(&redirect);

    let verifier = session
        .get(keys::PKCE_CODE_VERIFIER)
        .await
        .unwrap()
        .expect("verifier stored in session");
    assert!(verifier.len() >= 43);

    let expected_challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    assert_eq!(params["code_challenge"], expected_challenge);
    assert!(!params["code_challenge"].contains('='));
    assert_eq!(params["code_challenge_method"], "S256");

    service
        .complete_launch(&session, &CallbackParams::new("1234", &redirect.state))
        .await
        .unwrap();

    let form = ehr.token_form().await;
    assert_eq!(form["code_verifier"], verifier);
}

#[tokio::test]
async fn confidential_client_authenticates_with_basic_auth() {
    let ehr = MockEhr::start().await;
    ehr.mount_keys(1).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(basic_auth(CLIENT_ID, "CLIENT_SECRET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body(&signed_id_token(CLIENT_ID))),
        )
        .expect(1)
        .mount(&ehr.server)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID).with_client_secret("CLIENT_SECRET"),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();
    service
        .complete_launch(&session, &CallbackParams::new("1234", &redirect.state))
        .await
        .unwrap();

    let form = ehr.token_form().await;
    assert!(!form.contains_key("client_id"));
    assert!(!form.contains_key("client_secret"));
}

#[tokio::test]
async fn trust_policy_accepts_unsigned_token_without_fetching_keys() {
    let ehr = MockEhr::start().await;
    ehr.mount_keys(0).await;
    ehr.mount_token(token_body(&unsigned_id_token(CLIENT_ID)), 1)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default().with_id_token_policy(IdTokenPolicy::TrustTokenEndpoint),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();
    let result = service
        .complete_launch(&session, &CallbackParams::new("1234", &redirect.state))
        .await
        .unwrap();

    assert_eq!(result.subject, "SUBJECT");
    assert_eq!(result.id_token, unsigned_id_token(CLIENT_ID));
}

#[tokio::test]
async fn verify_policy_rejects_unsigned_token() {
    let ehr = MockEhr::start().await;
    // Rejected from its header alone
    ehr.mount_keys(0).await;
    ehr.mount_token(token_body(&unsigned_id_token(CLIENT_ID)), 1)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();
    let err = service
        .complete_launch(&session, &CallbackParams::new("1234", &redirect.state))
        .await
        .unwrap_err();

    assert!(matches!(err, SmartError::IdToken(_)));
    assert!(err.is_validation_error());
}

#[tokio::test]
async fn audience_is_bound_to_client_id() {
    let ehr = MockEhr::start().await;
    ehr.mount_keys(1).await;
    ehr.mount_token(token_body(&signed_id_token("SOMEONE_ELSE")), 1)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();
    let err = service
        .complete_launch(&session, &CallbackParams::new("1234", &redirect.state))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SmartError::AudienceMismatch { ref expected, ref actual }
            if expected == CLIENT_ID && actual == "SOMEONE_ELSE"
    ));
}

#[tokio::test]
async fn upstream_error_on_callback_skips_all_checks() {
    let ehr = MockEhr::start().await;
    ehr.mount_token(token_body(&signed_id_token(CLIENT_ID)), 0)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();

    let callback = CallbackParams::from_query([
        ("error", "access_denied"),
        ("error_description", "The user denied access"),
        ("state", redirect.state.as_str()),
    ]);
    let err = service
        .complete_launch(&session, &callback)
        .await
        .unwrap_err();

    assert!(matches!(err, SmartError::UpstreamAuth { ref error, .. } if error == "access_denied"));
    assert_eq!(
        LaunchSession::new(&session).status().await.unwrap(),
        Some(LaunchStatus::Launching)
    );
}

#[tokio::test]
async fn callback_without_code_keeps_launch_pending() {
    let ehr = MockEhr::start().await;
    ehr.mount_keys(1).await;
    ehr.mount_token(token_body(&signed_id_token(CLIENT_ID)), 1)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();

    let err = service
        .complete_launch(
            &session,
            &CallbackParams::from_query([("state", redirect.state.as_str())]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SmartError::InvalidRequest { .. }));
    assert_eq!(
        LaunchSession::new(&session).status().await.unwrap(),
        Some(LaunchStatus::Launching)
    );

    // The pending launch can still be completed
    service
        .complete_launch(&session, &CallbackParams::new("1234", &redirect.state))
        .await
        .unwrap();
}

#[tokio::test]
async fn relaunch_rejects_callback_of_the_earlier_launch() {
    let ehr = MockEhr::start().await;
    ehr.mount_keys(1).await;
    ehr.mount_token(token_body(&signed_id_token(CLIENT_ID)), 1)
        .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let first = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_1"))
        .await
        .unwrap();
    let second = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_2"))
        .await
        .unwrap();

    let err = service
        .complete_launch(&session, &CallbackParams::new("CODE_1", &first.state))
        .await
        .unwrap_err();
    assert!(matches!(err, SmartError::InvalidState));

    service
        .complete_launch(&session, &CallbackParams::new("CODE_2", &second.state))
        .await
        .unwrap();
    assert_eq!(ehr.token_form().await["code"], "CODE_2");
}

#[tokio::test]
async fn missing_launch_parameter_is_sent_empty() {
    let ehr = MockEhr::start().await;
    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(
            &session,
            &LaunchRequest::from_query([("iss", ehr.issuer().as_str())]),
        )
        .await
        .unwrap();

    let params = query(&redirect);
    assert_eq!(params.get("launch").map(String::as_str), Some(""));
    assert_eq!(params["state"], redirect.state);
}

#[tokio::test]
async fn token_body_error_fails_the_launch() {
    let ehr = MockEhr::start().await;
    ehr.mount_token(
        json!({ "error": "invalid_grant", "error_description": "Code expired" }),
        1,
    )
    .await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();
    let err = service
        .complete_launch(&session, &CallbackParams::new("1234", &redirect.state))
        .await
        .unwrap_err();

    assert!(matches!(err, SmartError::UpstreamAuth { ref description, .. } if description == "Code expired"));
}

#[tokio::test]
async fn failed_discovery_creates_no_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resourceType": "CapabilityStatement" })))
        .mount(&server)
        .await;

    let issuer = format!("{}/fhir", server.uri());
    let service = service(Client::new(&issuer, CLIENT_ID), SmartLaunchConfig::default());
    let session = MemorySessionStore::new();

    let err = service
        .start_launch(&session, &LaunchRequest::new(&issuer, "LAUNCH_ID"))
        .await
        .unwrap_err();

    assert!(matches!(err, SmartError::Discovery(_)));
    assert!(session.snapshot().await.is_empty());
}

/// Directory that records the parameters of every lookup.
struct RecordingDirectory {
    inner: InMemoryClientDirectory,
    lookups: Mutex<Vec<HashMap<String, String>>>,
}

#[async_trait]
impl ClientDirectory for RecordingDirectory {
    async fn find_by_issuer(
        &self,
        issuer: &str,
        params: &HashMap<String, String>,
    ) -> SmartResult<Option<Client>> {
        self.lookups.lock().unwrap().push(params.clone());
        self.inner.find_by_issuer(issuer, params).await
    }
}

#[tokio::test]
async fn directory_params_are_replayed_on_callback() {
    let ehr = MockEhr::start().await;
    ehr.mount_keys(1).await;
    ehr.mount_token(token_body(&signed_id_token(CLIENT_ID)), 1)
        .await;

    let directory = Arc::new(RecordingDirectory {
        inner: InMemoryClientDirectory::new(vec![Client::new(ehr.issuer(), CLIENT_ID)]),
        lookups: Mutex::new(Vec::new()),
    });
    let service = SmartLaunchService::new(
        SmartLaunchConfig::default().with_allow_http(true),
        directory.clone(),
    )
    .unwrap();
    let session = MemorySessionStore::new();

    let request = LaunchRequest::from_query([
        ("iss", ehr.issuer().as_str()),
        ("launch", "LAUNCH_ID"),
        ("tenant", "north"),
    ]);
    let redirect = service.start_launch(&session, &request).await.unwrap();
    assert!(!query(&redirect).contains_key("tenant"));

    service
        .complete_launch(&session, &CallbackParams::new("1234", &redirect.state))
        .await
        .unwrap();

    let lookups = directory.lookups.lock().unwrap();
    let expected = HashMap::from([("tenant".to_string(), "north".to_string())]);
    assert_eq!(lookups.len(), 2);
    assert_eq!(lookups[0], expected);
    assert_eq!(lookups[1], expected);
}

#[tokio::test]
async fn client_scope_override_is_requested() {
    let ehr = MockEhr::start().await;

    let service = service(
        Client::new(ehr.issuer(), CLIENT_ID).with_scope("launch openid fhirUser"),
        SmartLaunchConfig::default(),
    );
    let session = MemorySessionStore::new();

    let redirect = service
        .start_launch(&session, &LaunchRequest::new(ehr.issuer(), "LAUNCH_ID"))
        .await
        .unwrap();

    assert_eq!(query(&redirect)["scope"], "launch openid fhirUser");
    assert_eq!(
        session.get(keys::SCOPE_REQUESTED).await.unwrap().as_deref(),
        Some("launch openid fhirUser")
    );
}
