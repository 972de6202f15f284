//! Capability contracts exercised by a custom connector outside the crate.
//!
//! `TicketConnector` supports OAuth and nothing else, which is enough to
//! check that capability discovery, the registry and the class-level OAuth
//! helpers work for third-party implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use docsync::error::{ConnectorError, Result};
use docsync::models::DocumentSource;
use docsync::traits::{
    build_authorization_url, BaseConnector, ConnectorRegistry, Credentials, OAuthConnector,
};

struct TicketConnector {
    token: Option<String>,
}

#[async_trait]
impl BaseConnector for TicketConnector {
    fn name(&self) -> &str {
        "tickets"
    }

    fn source(&self) -> DocumentSource {
        DocumentSource::Jira
    }

    fn load_credentials(&mut self, credentials: &Credentials) -> Result<Option<Credentials>> {
        let token = credentials
            .get("access_token")
            .ok_or_else(|| ConnectorError::MissingCredential("access_token".to_string()))?;
        self.token = Some(token.clone());
        Ok(None)
    }

    async fn validate_connector_settings(&self) -> Result<()> {
        match &self.token {
            Some(_) => Ok(()),
            None => Err(ConnectorError::MissingCredential("tickets".to_string())),
        }
    }
}

#[async_trait]
impl OAuthConnector for TicketConnector {
    fn oauth_id() -> DocumentSource {
        DocumentSource::Jira
    }

    fn oauth_authorization_url(
        base_domain: &str,
        state: &str,
        additional_params: &BTreeMap<String, String>,
    ) -> Result<String> {
        build_authorization_url(
            &format!("{}/oauth/authorize", base_domain),
            &[("client_id", "docsync"), ("response_type", "code")],
            additional_params,
            state,
        )
    }

    async fn oauth_code_to_token(
        base_domain: &str,
        code: &str,
        _additional_params: &BTreeMap<String, String>,
    ) -> Result<Credentials> {
        if code.is_empty() {
            return Err(ConnectorError::validation("empty authorization code"));
        }
        let mut credentials = Credentials::new();
        credentials.insert("access_token".to_string(), format!("token-{}", code));
        credentials.insert("base_url".to_string(), base_domain.to_string());
        Ok(credentials)
    }
}

#[test]
fn oauth_url_carries_state_and_extra_params() {
    let mut extra = BTreeMap::new();
    extra.insert("scope".to_string(), "read".to_string());

    let url =
        TicketConnector::oauth_authorization_url("https://tickets.example.com", "nonce-1", &extra)
            .unwrap();
    assert_eq!(
        url,
        "https://tickets.example.com/oauth/authorize?client_id=docsync&response_type=code&scope=read&state=nonce-1"
    );
    assert_eq!(TicketConnector::oauth_id(), DocumentSource::Jira);
}

#[tokio::test]
async fn exchanged_token_loads_as_credentials() {
    let credentials = TicketConnector::oauth_code_to_token(
        "https://tickets.example.com",
        "abc",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    let mut connector = TicketConnector { token: None };
    assert!(matches!(
        connector.validate_connector_settings().await,
        Err(ConnectorError::MissingCredential(_))
    ));
    assert!(connector.load_credentials(&credentials).unwrap().is_none());
    connector.validate_connector_settings().await.unwrap();

    assert!(TicketConnector::oauth_code_to_token("x", "", &BTreeMap::new())
        .await
        .is_err());
}

#[test]
fn connector_without_sync_modes_advertises_none() {
    let connector = TicketConnector { token: None };
    assert!(connector.capabilities().is_empty());
    assert!(connector.as_load().is_none());
    assert!(connector.as_checkpoint().is_none());
    assert_eq!(connector.source_label(), "jira:tickets");
}

#[test]
fn registry_filters_by_source() {
    let mut registry = ConnectorRegistry::new();
    registry.register(Box::new(TicketConnector { token: None }));
    registry.register(Box::new(docsync::connector_wiki::WikiConnector::new(
        "handbook",
        Default::default(),
    )));

    assert_eq!(registry.connectors_by_source(DocumentSource::Jira).len(), 1);
    assert_eq!(
        registry.find("handbook").map(|c| c.capabilities().len()),
        Some(5)
    );
    assert!(registry.find_mut("tickets").is_some());
}
