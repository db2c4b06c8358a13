// ABOUTME: Integration tests for session registration, negotiation and the startup handshake.
// ABOUTME: Runs against the scripted in-memory backend.

use std::collections::BTreeSet;
use std::sync::Arc;

use xlm_gateway::config::{NegotiationPolicy, SessionConfig};
use xlm_gateway::{GatewayError, Session, SessionManager, SessionState};
use xlm_grpc::{CapabilityPreference, EcosystemTransport, MockTransport, Rpc};

fn transport(mock: &MockTransport) -> Arc<dyn EcosystemTransport> {
    Arc::new(mock.clone())
}

fn caps(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_register_then_negotiate() {
    let mock = MockTransport::new();
    let session = Session::register(transport(&mock), "chat-ui").await.unwrap();

    assert_eq!(session.state(), SessionState::Registered);
    assert_eq!(
        mock.registered(),
        vec![("chat-ui".to_string(), session.client_id().to_string())]
    );

    session
        .negotiate_capabilities("openai", ["chat", "embedding"])
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::CapabilityNegotiated);
    assert_eq!(
        session.preference().get("openai"),
        Some(&caps(&["chat", "embedding"]))
    );
}

#[tokio::test]
async fn test_denied_registration_yields_no_session() {
    let mock = MockTransport::new().deny_registration();

    let err = Session::register(transport(&mock), "chat-ui")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::RegistrationDenied { client_name } if client_name == "chat-ui"));
    assert!(mock.registered().is_empty());
}

#[tokio::test]
async fn test_negotiation_replaces_previous_mapping() {
    let mock = MockTransport::new();
    let session = Session::register(transport(&mock), "chat-ui").await.unwrap();

    session
        .negotiate_capabilities("openai", ["chat", "embedding"])
        .await
        .unwrap();
    session
        .negotiate_capabilities("gemini", ["chat"])
        .await
        .unwrap();

    let local = session.preference();
    assert_eq!(local.get("openai"), None);
    assert_eq!(local.get("gemini"), Some(&caps(&["chat"])));
    assert_eq!(mock.preference(session.client_id()), Some(local));
}

#[tokio::test]
async fn test_renegotiating_a_provider_drops_old_tags() {
    let mock = MockTransport::new();
    let session = Session::register(transport(&mock), "chat-ui").await.unwrap();

    session.negotiate_capabilities("openai", ["chat"]).await.unwrap();
    session
        .negotiate_capabilities("openai", ["embedding"])
        .await
        .unwrap();

    let backend = mock.preference(session.client_id()).unwrap();
    assert_eq!(backend.get("openai"), Some(&caps(&["embedding"])));
}

#[tokio::test]
async fn test_denied_negotiation_keeps_previous_preference() {
    let mock = MockTransport::new().deny_negotiation();
    let session = Session::register(transport(&mock), "chat-ui").await.unwrap();

    let err = session
        .negotiate_capabilities("openai", ["chat"])
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::NegotiationDenied { provider } if provider == "openai"));
    assert_eq!(session.state(), SessionState::Registered);
    assert_eq!(session.preference(), CapabilityPreference::new());
}

#[tokio::test]
async fn test_unregister_invalidates_session() {
    let mock = MockTransport::new();
    let session = Session::register(transport(&mock), "chat-ui").await.unwrap();

    assert!(session.unregister().await.unwrap());
    assert_eq!(session.state(), SessionState::Invalidated);

    // second call is a no-op
    assert!(session.unregister().await.unwrap());
    assert_eq!(mock.calls(Rpc::UnregisterClient), 1);

    let err = session.chat_request("Hello", "openai", "gpt-4").unwrap_err();
    assert!(matches!(err, GatewayError::SessionInvalidated { .. }));
    assert!(session.negotiate_capabilities("openai", ["chat"]).await.is_err());
    assert_eq!(mock.calls(Rpc::SetPreferredProviders), 0);
}

#[tokio::test]
async fn test_unacknowledged_unregister_still_invalidates() {
    let mock = MockTransport::new().deny_unregister();
    let session = Session::register(transport(&mock), "chat-ui").await.unwrap();

    assert!(!session.unregister().await.unwrap());
    assert_eq!(session.state(), SessionState::Invalidated);
}

#[tokio::test]
async fn test_chat_request_rejects_blank_prompt() {
    let mock = MockTransport::new();
    let session = Session::register(transport(&mock), "chat-ui").await.unwrap();

    assert!(matches!(
        session.chat_request("", "openai", "gpt-4"),
        Err(GatewayError::EmptyPrompt)
    ));
    assert!(matches!(
        session.chat_request(" \n\t", "openai", "gpt-4"),
        Err(GatewayError::EmptyPrompt)
    ));

    let request = session.chat_request("Hello", "openai", "gpt-4").unwrap();
    assert_eq!(request.client_id(), session.client_id());
    assert_eq!(request.prompt(), "Hello");
    assert_eq!(request.as_chat().model, "gpt-4");
}

#[tokio::test]
async fn test_manager_handshake_runs_once() {
    let mock = MockTransport::new();
    let manager = Arc::new(SessionManager::new(transport(&mock), SessionConfig::default()));
    assert!(manager.current().is_none());

    let (a, b) = tokio::join!(manager.establish(), manager.establish());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.client_id(), b.client_id());
    assert_eq!(mock.calls(Rpc::RegisterClient), 1);
    assert_eq!(mock.calls(Rpc::SetPreferredProviders), 1);
    assert_eq!(a.state(), SessionState::CapabilityNegotiated);
    assert_eq!(manager.current().unwrap().client_id(), a.client_id());
}

#[tokio::test]
async fn test_manager_continues_after_denied_negotiation() {
    let mock = MockTransport::new().deny_negotiation();
    let manager = SessionManager::new(transport(&mock), SessionConfig::default());

    let session = manager.establish().await.unwrap();

    assert_eq!(session.state(), SessionState::Registered);
    assert_eq!(mock.calls(Rpc::UnregisterClient), 0);
}

#[tokio::test]
async fn test_manager_aborts_on_denied_negotiation_when_configured() {
    let mock = MockTransport::new().deny_negotiation();
    let config = SessionConfig {
        negotiation_policy: NegotiationPolicy::Abort,
        ..SessionConfig::default()
    };
    let manager = SessionManager::new(transport(&mock), config);

    let err = manager.establish().await.unwrap_err();

    assert!(matches!(err, GatewayError::NegotiationDenied { .. }));
    assert!(manager.current().is_none());
    assert_eq!(mock.calls(Rpc::UnregisterClient), 1);
}

#[tokio::test]
async fn test_manager_retry_uses_fresh_identity() {
    let mock = MockTransport::new().deny_registration();
    let manager = SessionManager::new(transport(&mock), SessionConfig::default());

    assert!(manager.establish().await.is_err());
    assert!(manager.establish().await.is_err());

    assert_eq!(mock.calls(Rpc::RegisterClient), 2);
    assert_eq!(mock.calls(Rpc::AsyncChat), 0);
    assert_eq!(mock.calls(Rpc::SyncChat), 0);
}
