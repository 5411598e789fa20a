//! The platform action dispatcher.
//!
//! Routes engine action nodes to their backing capability: HTTP actions to
//! the guarded HTTP executor, provider operations to the registry, email to
//! the mailer. Anything unrecognized fails its step with a clear error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use trellis_core::domain::graph::{Node, NodeAction};
use trellis_core::engine::{ActionDispatcher, HttpAction};
use trellis_core::error::CoreError;
use trellis_providers::ProviderRegistry;

use crate::mailer::{Mail, Mailer};

pub struct PlatformDispatcher {
    http: HttpAction,
    providers: Arc<ProviderRegistry>,
    mailer: Arc<dyn Mailer>,
}

impl PlatformDispatcher {
    pub fn new(http: HttpAction, providers: Arc<ProviderRegistry>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            http,
            providers,
            mailer,
        }
    }
}

#[async_trait]
impl ActionDispatcher for PlatformDispatcher {
    async fn dispatch(
        &self,
        org_id: Uuid,
        node: &Node,
        action: &NodeAction,
        inputs: &Value,
    ) -> Result<Value, CoreError> {
        match action {
            NodeAction::Http(config) => self.http.execute(config).await,

            NodeAction::Email { to, subject, body } => {
                let to = to
                    .clone()
                    .or_else(|| {
                        inputs
                            .get("to")
                            .and_then(|v| v.as_str())
                            .map(String::from)
                    })
                    .ok_or_else(|| {
                        CoreError::Validation(format!("node {}: email action requires 'to'", node.id))
                    })?;

                let mail = Mail {
                    to: to.clone(),
                    subject: subject.clone().unwrap_or_else(|| "Flow notification".to_string()),
                    body: body.clone().unwrap_or_else(|| inputs.to_string()),
                };
                self.mailer.send(&mail).await?;
                Ok(json!({ "sent": true, "to": to }))
            }

            NodeAction::Provider {
                provider,
                operation,
                params,
            } => {
                // Node config wins over upstream outputs on key collisions
                let merged = merge_params(params, inputs);
                self.providers
                    .call(org_id, provider, operation, &merged)
                    .await
            }

            NodeAction::Unrecognized { node_type, kind } => Err(CoreError::Validation(format!(
                "node {}: unrecognized action (type {:?}, kind {:?})",
                node.id, node_type, kind
            ))),

            other => Err(CoreError::Internal(format!(
                "node {}: {:?} should not reach the dispatcher",
                node.id, other
            ))),
        }
    }
}

fn merge_params(config: &Value, inputs: &Value) -> Value {
    match (config, inputs) {
        (Value::Object(cfg), Value::Object(ins)) => {
            let mut merged = ins.clone();
            for (k, v) in cfg {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (Value::Null, ins) => ins.clone(),
        (cfg, _) => cfg.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::testing::CapturingMailer;
    use trellis_providers::NullTxRecorder;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: "action".to_string(),
            kind: Some("email".to_string()),
            label: None,
            x: 0.0,
            y: 0.0,
            config: None,
        }
    }

    fn dispatcher_with_mailer(mailer: Arc<CapturingMailer>) -> PlatformDispatcher {
        PlatformDispatcher::new(
            HttpAction::unguarded().unwrap(),
            Arc::new(ProviderRegistry::new(Arc::new(NullTxRecorder))),
            mailer,
        )
    }

    #[tokio::test]
    async fn test_email_action_sends_through_mailer() {
        let mailer = Arc::new(CapturingMailer::default());
        let dispatcher = dispatcher_with_mailer(mailer.clone());

        let action = NodeAction::Email {
            to: Some("ops@example.test".to_string()),
            subject: Some("Payment settled".to_string()),
            body: None,
        };
        let out = dispatcher
            .dispatch(Uuid::new_v4(), &node("mail"), &action, &json!({"amount": 5}))
            .await
            .unwrap();

        assert_eq!(out["sent"], true);
        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ops@example.test");
        assert_eq!(sent[0].subject, "Payment settled");
    }

    #[tokio::test]
    async fn test_email_without_recipient_fails() {
        let dispatcher = dispatcher_with_mailer(Arc::new(CapturingMailer::default()));
        let action = NodeAction::Email {
            to: None,
            subject: None,
            body: None,
        };
        let err = dispatcher
            .dispatch(Uuid::new_v4(), &node("mail"), &action, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_clearly() {
        let dispatcher = dispatcher_with_mailer(Arc::new(CapturingMailer::default()));
        let action = NodeAction::Provider {
            provider: "salesforce".to_string(),
            operation: "default".to_string(),
            params: Value::Null,
        };
        let err = dispatcher
            .dispatch(Uuid::new_v4(), &node("sf"), &action, &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no provider client registered"));
    }

    #[test]
    fn test_merge_params_config_wins() {
        let merged = merge_params(
            &json!({"amount": "200"}),
            &json!({"amount": "100", "phone": "256"}),
        );
        assert_eq!(merged["amount"], "200");
        assert_eq!(merged["phone"], "256");
    }
}
