//! BillingPortalHandler - links a subscriber to the provider's self-service portal.

use std::sync::Arc;

use tracing::info;

use crate::adapters::payments::ProviderRegistry;
use crate::domain::billing::BillingError;
use crate::domain::foundation::UserId;
use crate::ports::{PortalSession, SubscriptionRepository};

#[derive(Debug, Clone)]
pub struct BillingPortalCommand {
    pub user_id: UserId,
    /// Defaults to `{app_url}/subscription`.
    pub return_url: Option<String>,
}

pub struct BillingPortalHandler {
    registry: Arc<ProviderRegistry>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    app_url: String,
}

impl BillingPortalHandler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn handle(&self, cmd: BillingPortalCommand) -> Result<PortalSession, BillingError> {
        let subscription = self
            .subscriptions
            .find_live_by_user(&cmd.user_id)
            .await?
            .ok_or_else(|| BillingError::NoLiveSubscription(cmd.user_id.clone()))?;
        let (Some(kind), Some(subscription_ref)) =
            (subscription.provider, subscription.provider_subscription_ref.as_deref())
        else {
            return Err(BillingError::InvalidState(format!(
                "subscription {} is not billed through a provider",
                subscription.id
            )));
        };

        let provider = self.registry.get(kind)?;
        let return_url = cmd
            .return_url
            .unwrap_or_else(|| format!("{}/subscription", self.app_url));
        let session = provider.create_portal_session(subscription_ref, &return_url).await?;

        info!(
            user_id = %cmd.user_id,
            provider = %kind,
            subscription_id = %subscription.id,
            "Billing portal session created"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::adapters::payments::MockPaymentProvider;
    use crate::domain::billing::{BillingCycle, Plan, ProviderKind, Subscription};
    use crate::domain::foundation::Timestamp;
    use crate::ports::PaymentErrorCode;

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    fn plan(code: &str) -> Plan {
        crate::domain::billing::default_plans("PLN")
            .into_iter()
            .find(|p| p.code == code)
            .unwrap()
    }

    fn handler(store: &Arc<InMemoryBillingStore>, mock: MockPaymentProvider) -> BillingPortalHandler {
        let registry = ProviderRegistry::new().with(Arc::new(mock));
        BillingPortalHandler::new(Arc::new(registry), store.clone(), "https://app.example/")
    }

    fn command() -> BillingPortalCommand {
        BillingPortalCommand {
            user_id: user(),
            return_url: None,
        }
    }

    #[tokio::test]
    async fn opens_portal_for_paid_subscription() {
        let store = Arc::new(InMemoryBillingStore::new());
        let sub = Subscription::start(
            user(),
            &plan("premium"),
            BillingCycle::Monthly,
            Some(ProviderKind::Stripe),
            Some("sub_1".into()),
            Timestamp::now(),
        );
        SubscriptionRepository::insert(store.as_ref(), &sub).await.unwrap();
        let mock = MockPaymentProvider::new(ProviderKind::Stripe);

        let session = handler(&store, mock.clone()).handle(command()).await.unwrap();

        assert!(session.url.starts_with("https://portal.example/"));
        let call = &mock.calls()[0];
        assert_eq!(call.method, "create_portal_session");
        assert_eq!(call.args, vec!["sub_1".to_string(), "https://app.example/subscription".to_string()]);
    }

    #[tokio::test]
    async fn free_subscription_has_no_portal() {
        let store = Arc::new(InMemoryBillingStore::new());
        let sub = Subscription::start(user(), &plan("free"), BillingCycle::Monthly, None, None, Timestamp::now());
        SubscriptionRepository::insert(store.as_ref(), &sub).await.unwrap();

        let err = handler(&store, MockPaymentProvider::new(ProviderKind::Stripe))
            .handle(command())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidState(_)));
    }

    #[tokio::test]
    async fn without_subscription_is_rejected() {
        let store = Arc::new(InMemoryBillingStore::new());
        let err = handler(&store, MockPaymentProvider::new(ProviderKind::Stripe))
            .handle(command())
            .await
            .unwrap_err();
        assert_eq!(err, BillingError::NoLiveSubscription(user()));
    }

    #[tokio::test]
    async fn providers_without_portal_report_unsupported() {
        let store = Arc::new(InMemoryBillingStore::new());
        let sub = Subscription::start(
            user(),
            &plan("basic"),
            BillingCycle::Monthly,
            Some(ProviderKind::Przelewy24),
            Some("p24_1".into()),
            Timestamp::now(),
        );
        SubscriptionRepository::insert(store.as_ref(), &sub).await.unwrap();
        let mock = MockPaymentProvider::new(ProviderKind::Przelewy24);
        mock.set_method_error(
            "create_portal_session",
            crate::ports::PaymentError::unsupported(ProviderKind::Przelewy24, "a billing portal"),
        );

        let err = handler(&store, mock).handle(command()).await.unwrap_err();
        assert_eq!(
            err,
            BillingError::provider(
                PaymentErrorCode::Unsupported.to_string(),
                "przelewy24 does not offer a billing portal",
                false
            )
        );
    }
}
